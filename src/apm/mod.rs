//! APM client.
//!
//! # Data Flow
//! ```text
//! TracerCell (once-initialised)
//!     → Tracer::start_transaction (sampling decision)
//!     → Transaction::start_span (sampled transactions only)
//!     → enrich: HTTP request/response context, destination, result
//!     → end(self) → Event → Reporter
//! ```
//!
//! # Design Decisions
//! - `end` consumes the transaction/span so each is closed at most once
//! - Events are plain serializable values; delivery to an APM server is
//!   the reporter's concern
//! - Unsampled transactions are reported without context and never get spans

pub mod context;
pub mod reporter;
pub mod span;
pub mod tracer;
pub mod transaction;

pub use context::{Destination, HttpRequestContext, HttpResponseContext, Outcome};
pub use reporter::{ChannelReporter, Event, LogReporter, Reporter, SpanEvent, TransactionEvent};
pub use span::{Span, SpanOptions};
pub use tracer::{ServiceInfo, TraceOrigin, Tracer, TracerCell, TracerError, TransactionOptions};
pub use transaction::Transaction;
