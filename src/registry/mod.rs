//! Active-trace registry.
//!
//! # Data Flow
//! ```text
//! access phase:   put(token, transaction, span?)
//! response phase: remove(token) → enrich → end
//! sweeper:        evict entries older than the TTL
//! ```
//!
//! # Design Decisions
//! - Sharded concurrent map: requests only contend when tokens share a shard
//! - `remove` hands back ownership, so a pair can be ended at most once
//! - The registry is an owned value injected where needed, never a global

pub mod store;
pub mod sweeper;

pub use store::{ActiveTrace, ActiveTraceRegistry, CorrelationToken};
pub use sweeper::RegistrySweeper;
