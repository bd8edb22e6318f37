//! Trace-context propagation.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → traceparent.rs (version-traceid-spanid-flags)
//!     → tracestate.rs  (vendor key=value list, optional)
//!     → TraceParent + TraceState handed to the correlator
//!
//! outbound request
//!     ← TraceParent with this hop's span id
//!     ← TraceState passed through unchanged
//! ```
//!
//! # Design Decisions
//! - Only version `00` is understood; anything else is a decode error
//! - Ids are lowercase hex on the wire and raw bytes in memory
//! - A bad `tracestate` never invalidates a good `traceparent`

pub mod error;
pub mod traceparent;
pub mod tracestate;

pub use error::PropagationError;
pub use traceparent::{
    format, parse, SpanId, TraceFlags, TraceId, TraceParent, TRACEPARENT_HEADER,
};
pub use tracestate::{TraceState, TRACESTATE_HEADER};
