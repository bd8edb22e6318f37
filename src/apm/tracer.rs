//! Tracer construction, sampling and the once-initialised handle.
//!
//! # Responsibilities
//! - Validate the service identity and server URL at construction
//! - Decide sampling for new traces; inherit it for continued ones
//! - Start transactions with the right trace identity
//!
//! # Design Decisions
//! - Construction failure is a startup error, surfaced to the caller
//! - `TracerCell` guarantees a single tracer even under concurrent first use

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::apm::reporter::Reporter;
use crate::apm::transaction::Transaction;
use crate::config::ApmConfig;
use crate::observability::metrics;
use crate::propagation::{SpanId, TraceFlags, TraceId, TraceParent, TraceState};

/// Errors constructing a tracer.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("invalid service name {0:?}: only letters, digits, spaces, '_' and '-' are allowed")]
    InvalidServiceName(String),

    #[error("invalid APM server URL {url:?}")]
    InvalidServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("transaction sample rate {0} is outside [0, 1]")]
    InvalidSampleRate(f64),
}

/// Identity of the service producing events.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Where a transaction's trace identity comes from.
#[derive(Debug, Clone, Copy, Default)]
pub enum TraceOrigin {
    /// New trace; the tracer samples.
    #[default]
    New,
    /// Child of the given remote span: same trace, fresh transaction id,
    /// inherited flags.
    Continue(TraceParent),
    /// Use the given context as the transaction's own identity: its span id
    /// becomes the transaction id and there is no parent.
    Adopt(TraceParent),
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub origin: TraceOrigin,
    pub trace_state: Option<TraceState>,
    /// Backdated start; defaults to now.
    pub start: Option<SystemTime>,
}

pub struct Tracer {
    service: ServiceInfo,
    server_url: Url,
    sample_rate: f64,
    recording: bool,
    capture_headers: bool,
    labels: BTreeMap<String, String>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.service)
            .field("server_url", &self.server_url.as_str())
            .field("sample_rate", &self.sample_rate)
            .field("recording", &self.recording)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// Build a tracer from plugin configuration.
    pub fn new(config: &ApmConfig, reporter: Arc<dyn Reporter>) -> Result<Self, TracerError> {
        let name = config.service_name.trim();
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'));
        if !valid_name {
            return Err(TracerError::InvalidServiceName(config.service_name.clone()));
        }

        let server_url =
            Url::parse(&config.server_url).map_err(|source| TracerError::InvalidServerUrl {
                url: config.server_url.clone(),
                source,
            })?;

        if !(0.0..=1.0).contains(&config.transaction_sample_rate) {
            return Err(TracerError::InvalidSampleRate(config.transaction_sample_rate));
        }

        let service = ServiceInfo {
            name: name.to_string(),
            version: config.service_version.clone(),
            environment: config.environment.clone(),
            node_name: config.service_node_name.clone(),
        };

        tracing::info!(
            service = %service.name,
            server_url = %server_url,
            sample_rate = config.transaction_sample_rate,
            recording = config.recording,
            "APM tracer initialized"
        );

        Ok(Self {
            service,
            server_url,
            sample_rate: config.transaction_sample_rate,
            recording: config.recording,
            capture_headers: config.capture_headers,
            labels: config.global_labels.clone(),
            reporter,
        })
    }

    fn should_sample(&self) -> bool {
        if self.sample_rate >= 1.0 {
            true
        } else if self.sample_rate <= 0.0 {
            false
        } else {
            fastrand::f64() < self.sample_rate
        }
    }

    /// Start a transaction named `name` of type `kind`.
    pub fn start_transaction(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        options: TransactionOptions,
    ) -> Transaction {
        let (trace_id, id, parent_id, flags) = match options.origin {
            TraceOrigin::New => (
                TraceId::random(),
                SpanId::random(),
                None,
                TraceFlags::default().with_sampled(self.should_sample()),
            ),
            TraceOrigin::Continue(parent) => (
                parent.trace_id,
                SpanId::random(),
                Some(parent.span_id),
                parent.flags,
            ),
            TraceOrigin::Adopt(context) => (context.trace_id, context.span_id, None, context.flags),
        };

        let flags = if self.recording {
            flags
        } else {
            flags.with_sampled(false)
        };

        metrics::record_transaction_started(flags.is_sampled());

        Transaction {
            name: name.into(),
            kind: kind.into(),
            trace_id,
            id,
            parent_id,
            flags,
            trace_state: options.trace_state,
            start: options.start.unwrap_or_else(SystemTime::now),
            started: Instant::now(),
            result: None,
            request: None,
            response: None,
            labels: self.labels.clone(),
            capture_headers: self.capture_headers,
            reporter: self.reporter.clone(),
        }
    }
}

/// Process-wide tracer slot, initialised at most once.
#[derive(Debug, Default)]
pub struct TracerCell {
    cell: OnceCell<Arc<Tracer>>,
}

impl TracerCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the tracer, building it with `init` if this is the first call.
    ///
    /// Concurrent first callers block until one `init` finishes; `init` runs
    /// again only if every previous attempt failed.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<&Arc<Tracer>, TracerError>
    where
        F: FnOnce() -> Result<Tracer, TracerError>,
    {
        self.cell.get_or_try_init(|| init().map(Arc::new))
    }

    pub fn get(&self) -> Option<&Arc<Tracer>> {
        self.cell.get()
    }
}
