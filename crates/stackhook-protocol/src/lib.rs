//! Wire types for the orchestrator's lifecycle-event/response protocol.
//!
//! This crate defines the inbound event envelope (`Envelope`), its strict
//! decoding into a `LifecycleRequest` keyed by `RequestType`, the fixed-shape
//! `LifecycleResponse` acknowledgment, the `ResourceKind` routing key, and
//! helpers for parsing per-resource property maps.

pub mod properties;
pub mod request;
pub mod response;

pub use properties::{parse_properties, Properties};
pub use request::{
    Envelope, LifecycleRequest, RequestAction, RequestContext, RequestType, ResourceKind,
};
pub use response::{LifecycleResponse, ResponseStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(String),
    #[error("Unexpected Request Type")]
    UnexpectedRequestType(String),
    #[error("invalid {request_type} request: {message}")]
    InvalidRequest {
        request_type: RequestType,
        message: String,
    },
    #[error("invalid resource properties: {0}")]
    InvalidProperties(String),
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),
}
