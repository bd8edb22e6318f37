//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C → trigger → server stops accepting, sweeper and
//!     reconstruction worker exit after draining
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
