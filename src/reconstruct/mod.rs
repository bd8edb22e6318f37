//! Log-mode trace reconstruction.
//!
//! # Data Flow
//! ```text
//! access phase (log mode) stamps traceparent + prior-hop headers
//!     → request finishes → LogRecord (record.rs)
//!     → ReconstructionWorker (worker.rs) or `gateway-apm reconstruct`
//!     → Reconstructor (reconstructor.rs): identity from headers,
//!       timing from latencies → span + transaction, ended at once
//! ```

pub mod reconstructor;
pub mod record;
pub mod worker;

pub use reconstructor::{ReconstructError, ReconstructedTiming, Reconstruction, Reconstructor};
pub use record::{Latencies, LogRecord, RequestRecord, ResponseRecord};
pub use worker::ReconstructionWorker;
