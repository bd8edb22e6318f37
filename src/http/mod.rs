//! HTTP gateway host.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → Exchange built from the request
//!     → TracingPlugin::access (may set upstream headers)
//!     → forward to the configured service
//!     → TracingPlugin::response
//!     → LogRecord to the reconstruction worker (log mode)
//!     → response to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
