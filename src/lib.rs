//! APM tracing for an API gateway.
//!
//! Correlates each proxied request into a transaction (the inbound request)
//! and a span (the upstream call), continuing W3C trace context across hops.
//! Two strategies are supported: live correlation across the access and
//! response phases, or post-hoc reconstruction from access-log records.

pub mod apm;
pub mod config;
pub mod correlator;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod propagation;
pub mod reconstruct;
pub mod registry;

pub use config::GatewayConfig;
pub use correlator::TracingPlugin;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
