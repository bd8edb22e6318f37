//! The contract between the tracing phases and the gateway hosting them.

use thiserror::Error;

use crate::gateway::headers::Headers;
use crate::gateway::service::ServiceDescriptor;

/// Failure of a single host accessor call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessorError {
    /// The value is not available in the current phase.
    #[error("{0} is not available")]
    Unavailable(&'static str),

    /// No value stored under the shared-context key.
    #[error("no shared value for key {0:?}")]
    MissingShared(String),

    /// The host refused the operation.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// Per-request view of the gateway, one instance per in-flight request.
///
/// Access and response phases of the same request see the same instance,
/// so `set_shared` in one is visible to `get_shared` in the other.
pub trait GatewayContext {
    fn request_method(&self) -> Result<String, AccessorError>;

    fn forwarded_scheme(&self) -> Result<String, AccessorError>;

    fn forwarded_host(&self) -> Result<String, AccessorError>;

    fn forwarded_port(&self) -> Result<u16, AccessorError>;

    fn forwarded_path(&self) -> Result<String, AccessorError>;

    /// Headers as received from the client.
    fn request_headers(&self) -> Result<Headers, AccessorError>;

    /// The upstream service the route resolved to.
    fn service(&self) -> Result<ServiceDescriptor, AccessorError>;

    /// Status returned by the upstream service.
    fn service_response_status(&self) -> Result<u16, AccessorError>;

    /// Headers returned by the upstream service.
    fn service_response_headers(&self) -> Result<Headers, AccessorError>;

    /// Headers sent back to the client.
    fn response_headers(&self) -> Result<Headers, AccessorError>;

    fn set_shared(&mut self, key: &str, value: String) -> Result<(), AccessorError>;

    fn get_shared(&self, key: &str) -> Result<String, AccessorError>;

    /// Set a header on the request forwarded to the upstream service,
    /// replacing any value copied from the inbound request.
    fn set_upstream_header(&mut self, name: &str, value: &str) -> Result<(), AccessorError>;
}
