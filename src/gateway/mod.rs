//! Gateway host seam.
//!
//! # Data Flow
//! ```text
//! gateway request pipeline (host)
//!     → GatewayContext accessor calls (method, forwarded host/port/path, headers, ...)
//!     → accessors.rs (log failures, substitute empty values)
//!     → correlator phases
//!     ← set_upstream_header / set_shared
//! ```
//!
//! # Design Decisions
//! - Every accessor is independently failable; a failure is logged and read
//!   as an empty value, never propagated
//! - The per-request shared slot is owned by the host, not by this crate

pub mod accessors;
pub mod context;
pub mod exchange;
pub mod headers;
pub mod service;

pub use context::{AccessorError, GatewayContext};
pub use exchange::Exchange;
pub use headers::Headers;
pub use service::ServiceDescriptor;
