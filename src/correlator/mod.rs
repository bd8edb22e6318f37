//! Request-phase correlation.
//!
//! # Data Flow
//! ```text
//! access phase (access.rs)
//!     sync mode: traceparent? → continue or new transaction
//!                → token into the shared slot
//!                → span + outbound traceparent (sampled only)
//!                → registry.put
//!     log mode:  stamp outbound + prior-hop headers for the reconstructor
//!
//! response phase (response.rs)
//!     token from the shared slot → registry.remove
//!     → enrich + end span, enrich + end transaction
//! ```
//!
//! # Design Decisions
//! - Phases never fail the request: every problem is logged and tracing stops
//! - Config is read through `ArcSwap`, so a reload never tears a phase
//! - The tracer is built once, on first use or eagerly at startup

pub mod access;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::apm::{Reporter, TraceOrigin, Tracer, TracerCell, TracerError};
use crate::config::ApmConfig;
use crate::gateway::{GatewayContext, Headers};
use crate::observability::metrics;
use crate::propagation::{TraceParent, TraceState, TRACEPARENT_HEADER, TRACESTATE_HEADER};
use crate::reconstruct::Reconstructor;
use crate::registry::{ActiveTraceRegistry, RegistrySweeper};

/// Shared-context key under which the access phase leaves the correlation token.
pub const CORRELATION_TOKEN_KEY: &str = "apm_correlation_token";

pub const TRANSACTION_KIND: &str = "request";
pub const SPAN_KIND: &str = "external";

/// The APM plugin: one per gateway process, shared by all requests.
pub struct TracingPlugin {
    config: ArcSwap<ApmConfig>,
    tracer: TracerCell,
    registry: Arc<ActiveTraceRegistry>,
    reporter: Arc<dyn Reporter>,
}

impl TracingPlugin {
    /// Create the plugin. The tracer is built lazily on the first request.
    pub fn new(config: ApmConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            tracer: TracerCell::new(),
            registry: Arc::new(ActiveTraceRegistry::new()),
            reporter,
        }
    }

    /// Create the plugin and, if tracing is active, build the tracer now.
    ///
    /// A tracer that cannot be built while tracing is requested is fatal.
    pub fn start(config: ApmConfig, reporter: Arc<dyn Reporter>) -> Result<Self, TracerError> {
        let plugin = Self::new(config, reporter);
        if plugin.config().active {
            plugin.tracer()?;
        } else {
            tracing::info!("APM agent is not activated");
        }
        Ok(plugin)
    }

    pub fn config(&self) -> Arc<ApmConfig> {
        self.config.load_full()
    }

    /// Publish a reloaded configuration to subsequent phases.
    ///
    /// Tracer identity and the sweeper schedule are fixed once built; changes
    /// to them are logged and only apply after a restart.
    pub fn update_config(&self, config: ApmConfig) {
        let frozen = restart_required(&self.config.load(), &config);
        if !frozen.is_empty() {
            tracing::warn!(
                fields = ?frozen,
                "Reloaded APM settings take effect only after a restart"
            );
        }

        tracing::info!(
            active = config.active,
            mode = ?config.mode,
            "APM configuration updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn registry(&self) -> &Arc<ActiveTraceRegistry> {
        &self.registry
    }

    /// The process-wide tracer, built on first call.
    pub fn tracer(&self) -> Result<&Arc<Tracer>, TracerError> {
        self.tracer.get_or_try_init(|| {
            let config = self.config.load();
            Tracer::new(&config, self.reporter.clone())
        })
    }

    /// Sweeper for this plugin's registry, using the configured TTL and interval.
    pub fn sweeper(&self) -> RegistrySweeper {
        let config = self.config.load();
        RegistrySweeper::new(
            self.registry.clone(),
            Duration::from_secs(config.registry_ttl_secs),
            Duration::from_secs(config.sweep_interval_secs),
        )
    }

    /// Log-record reconstructor sharing this plugin's tracer.
    pub fn reconstructor(&self) -> Result<Reconstructor, TracerError> {
        let tracer = self.tracer()?.clone();
        Ok(Reconstructor::new(tracer, self.config.load().prior_hop_header.clone()))
    }
}

/// Settings that differ between `old` and `new` but are read only at startup.
fn restart_required(old: &ApmConfig, new: &ApmConfig) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if old.service_name != new.service_name {
        fields.push("service_name");
    }
    if old.server_url != new.server_url {
        fields.push("server_url");
    }
    if old.transaction_sample_rate != new.transaction_sample_rate {
        fields.push("transaction_sample_rate");
    }
    if old.recording != new.recording {
        fields.push("recording");
    }
    if old.registry_ttl_secs != new.registry_ttl_secs {
        fields.push("registry_ttl_secs");
    }
    if old.sweep_interval_secs != new.sweep_interval_secs {
        fields.push("sweep_interval_secs");
    }
    fields
}

/// Decode the inbound trace context, if any.
///
/// A malformed `traceparent` is logged and treated as absent.
pub(crate) fn extract_context(headers: &Headers) -> (TraceOrigin, Option<TraceState>) {
    let Some(value) = headers.first(TRACEPARENT_HEADER) else {
        return (TraceOrigin::New, None);
    };

    match value.parse::<TraceParent>() {
        Ok(parent) => {
            tracing::info!(traceparent = %value, "Found trace parent");
            (TraceOrigin::Continue(parent), extract_trace_state(headers))
        }
        Err(e) => {
            tracing::error!(traceparent = %value, error = %e, "Ignoring malformed traceparent header");
            metrics::record_propagation_error("traceparent");
            (TraceOrigin::New, None)
        }
    }
}

fn extract_trace_state(headers: &Headers) -> Option<TraceState> {
    let values = headers.get_all(TRACESTATE_HEADER);
    if values.is_empty() {
        return None;
    }

    match TraceState::parse(values) {
        Ok(state) if !state.is_empty() => {
            tracing::debug!(tracestate = %state, "Found trace state");
            Some(state)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping invalid tracestate header");
            metrics::record_propagation_error("tracestate");
            None
        }
    }
}

/// Set `traceparent` (and `tracestate` when present) on the upstream request.
pub(crate) fn inject_context(
    ctx: &mut dyn GatewayContext,
    parent: TraceParent,
    state: Option<&TraceState>,
) {
    if let Err(e) = ctx.set_upstream_header(TRACEPARENT_HEADER, &parent.to_string()) {
        tracing::error!(error = %e, "Error setting traceparent header to service request");
    }
    if let Some(state) = state {
        if let Err(e) = ctx.set_upstream_header(TRACESTATE_HEADER, &state.to_string()) {
            tracing::error!(error = %e, "Error setting tracestate header to service request");
        }
    }
}
