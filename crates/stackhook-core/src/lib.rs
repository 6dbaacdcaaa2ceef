//! Lifecycle reconcilers for stackhook custom resources.
//!
//! This crate maps each decoded `LifecycleRequest` to the driver calls that
//! bring remote state in line with it: purging a bucket's versions before
//! deletion (`BucketPurge`), keeping a DNS alias record in sync (`DnsAlias`),
//! and issuing or rotating a DNS-validated certificate (`DnsCertificate`).
//! The `Dispatcher` is the entrypoint: it decodes the inbound event, routes
//! it, and guarantees exactly one acknowledgment per event.

pub mod alias;
pub mod bucket;
pub mod certificate;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod patience;

pub use alias::DnsAlias;
pub use bucket::{purge_bucket, BucketPurge, PurgeReport};
pub use certificate::DnsCertificate;
pub use config::HandlerConfig;
pub use dispatch::Dispatcher;
pub use lifecycle::{Reconciled, Reconciler};
pub use patience::Patience;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Protocol(#[from] stackhook_protocol::ProtocolError),
    #[error(transparent)]
    Driver(#[from] stackhook_remote::DriverError),
    #[error("callback delivery failed: {0}")]
    Callback(#[from] stackhook_remote::CallbackError),
    #[error("no hosted zone configured (set HOSTED_ZONE_ID)")]
    MissingHostedZone,
    #[error("missing required property '{0}'")]
    MissingProperty(&'static str),
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },
    #[error("certificate {arn} entered status {status}")]
    CertificateFailed { arn: String, status: String },
    #[error("failed to purge bucket '{bucket}': {message}")]
    PurgeFailed { bucket: String, message: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reconciler panicked: {0}")]
    Panic(String),
}

impl CoreError {
    /// Whether the underlying remote error says the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Driver(e) if e.is_not_found())
    }
}
