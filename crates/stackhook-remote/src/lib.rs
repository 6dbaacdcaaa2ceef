//! External resource drivers and the callback client for stackhook.
//!
//! Each driver wraps one remote API surface behind a trait: object-store
//! version listing and batch deletion (`ObjectStoreDriver`), DNS change-batch
//! submission (`DnsDriver`), and certificate request/validation/deletion
//! (`CertificateDriver`). HTTP implementations talk JSON to a control-plane
//! endpoint described by an explicit `ClientContext`; `mock::MockCloud`
//! implements all three in memory for tests (`mock` feature). `callback` delivers the single
//! lifecycle acknowledgment to the orchestrator's presigned URL.

pub mod callback;
pub mod certs;
pub mod config;
pub mod dns;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod objects;

#[cfg(test)]
mod mock_server;

pub use callback::{CallbackSender, HttpCallback};
pub use certs::{CertificateDriver, HttpCertificates};
pub use config::ClientContext;
pub use dns::{DnsDriver, HttpDns};
pub use objects::{HttpObjectStore, ObjectStoreDriver};

use std::sync::Arc;
use thiserror::Error;

/// Remote error codes meaning the addressed bucket or certificate does not exist.
pub const NOT_FOUND_CODES: [&str; 2] = ["NoSuchBucket", "ResourceNotFoundException"];

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DriverError {
    /// Build an error from a remote `{Code, Message}` body.
    ///
    /// Only codes naming the addressed resource itself (`NOT_FOUND_CODES`)
    /// are classified as `NotFound`. A missing hosted zone, or a 404 without a
    /// code from a misrouted endpoint, stays an `Api` error: treating those as
    /// "already gone" would report success while the resource remains.
    pub fn from_api(status: u16, code: &str, message: &str) -> Self {
        if NOT_FOUND_CODES.contains(&code) {
            let detail = if message.is_empty() { code } else { message };
            return DriverError::NotFound(detail.to_owned());
        }
        DriverError::Api {
            status,
            code: code.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("failed to serialize response: {0}")]
    Serialization(#[from] stackhook_protocol::ProtocolError),
    #[error("callback transport failed: {0}")]
    Transport(String),
    #[error("callback URL rejected the response with HTTP {0}")]
    Rejected(u16),
}

/// The set of drivers one invocation works with.
#[derive(Clone)]
pub struct Drivers {
    pub objects: Arc<dyn ObjectStoreDriver>,
    pub dns: Arc<dyn DnsDriver>,
    pub certificates: Arc<dyn CertificateDriver>,
}

impl Drivers {
    /// Fresh HTTP drivers, each with its own connection pool.
    pub fn http(context: &ClientContext) -> Self {
        Self {
            objects: Arc::new(HttpObjectStore::new(context.clone())),
            dns: Arc::new(HttpDns::new(context.clone())),
            certificates: Arc::new(HttpCertificates::new(context.clone())),
        }
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn from_mock(cloud: &Arc<mock::MockCloud>) -> Self {
        Self {
            objects: Arc::clone(cloud) as Arc<dyn ObjectStoreDriver>,
            dns: Arc::clone(cloud) as Arc<dyn DnsDriver>,
            certificates: Arc::clone(cloud) as Arc<dyn CertificateDriver>,
        }
    }
}

/// Produces the drivers for a single invocation.
///
/// Invocations must not share connections, so the dispatcher asks for a new
/// set every time rather than holding one.
pub trait DriverFactory: Send + Sync {
    fn connect(&self) -> Drivers;
}

pub struct HttpDriverFactory {
    context: ClientContext,
}

impl HttpDriverFactory {
    pub fn new(context: ClientContext) -> Self {
        Self { context }
    }
}

impl DriverFactory for HttpDriverFactory {
    fn connect(&self) -> Drivers {
        Drivers::http(&self.context)
    }
}

#[cfg(any(test, feature = "mock"))]
impl DriverFactory for Arc<mock::MockCloud> {
    fn connect(&self) -> Drivers {
        Drivers::from_mock(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_classify_not_found() {
        assert!(DriverError::from_api(404, "NoSuchBucket", "missing").is_not_found());
        assert!(DriverError::from_api(400, "ResourceNotFoundException", "x").is_not_found());
        let err = DriverError::from_api(400, "Throttling", "slow down");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Throttling: slow down");
    }

    #[test]
    fn not_found_falls_back_to_code_when_message_empty() {
        let err = DriverError::from_api(404, "NoSuchBucket", "");
        assert_eq!(err.to_string(), "not found: NoSuchBucket");
    }

    #[test]
    fn missing_zone_and_bare_404_are_not_not_found() {
        let zone = DriverError::from_api(404, "NoSuchHostedZone", "No hosted zone found");
        assert!(!zone.is_not_found());
        assert_eq!(zone.to_string(), "NoSuchHostedZone: No hosted zone found");
        assert!(!DriverError::from_api(404, "", "HTTP 404").is_not_found());
        assert!(!DriverError::from_api(404, "NoSuchChange", "gone").is_not_found());
    }
}
