//! Errors raised while decoding propagation headers.
//!
//! Decode failures are never fatal: the correlator logs them and starts a
//! fresh trace, the reconstructor drops the one record.

use thiserror::Error;

/// Error decoding a `traceparent` or `tracestate` value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropagationError {
    /// The header did not split into exactly four dash-separated fields.
    #[error("traceparent must have 4 dash-separated fields, found {0}")]
    FieldCount(usize),

    /// Version other than `00`.
    #[error("unsupported traceparent version {0:?}")]
    UnsupportedVersion(String),

    /// An id or flags field was not lowercase hex of the required width.
    #[error("invalid {field}: expected {expected} lowercase hex characters, got {actual:?}")]
    InvalidHex {
        field: &'static str,
        expected: usize,
        actual: String,
    },

    /// Trace and span ids of all zeros are reserved as invalid.
    #[error("{0} must not be all zeros")]
    ZeroId(&'static str),

    /// Malformed `tracestate` list.
    #[error("invalid tracestate: {0}")]
    TraceState(String),
}
