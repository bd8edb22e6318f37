//! Hand-off of ended transactions and spans.
//!
//! # Responsibilities
//! - Define the immutable events produced by `end()`
//! - Deliver them somewhere: the log stream or an in-process channel
//!
//! # Design Decisions
//! - Fire-and-forget: `report` never blocks and never fails the caller
//! - Events serialize as `{"transaction": {...}}` / `{"span": {...}}`

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::apm::context::{Destination, HttpRequestContext, HttpResponseContext, Outcome};
use crate::propagation::{SpanId, TraceId};

/// A finished transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionEvent {
    pub id: SpanId,
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub outcome: Outcome,
    pub sampled: bool,
    /// Start, microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Milliseconds.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<TransactionContext>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequestContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponseContext>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A finished span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub parent_id: SpanId,
    pub transaction_id: SpanId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub outcome: Outcome,
    pub timestamp: u64,
    pub duration: f64,
    pub context: SpanContext,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpanContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<SpanHttpContext>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpanHttpContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequestContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponseContext>,
}

impl SpanEvent {
    pub fn status_code(&self) -> Option<u16> {
        self.context
            .http
            .as_ref()
            .and_then(|http| http.response.as_ref())
            .and_then(|response| response.status_code)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Transaction(TransactionEvent),
    Span(SpanEvent),
}

impl Event {
    pub fn as_transaction(&self) -> Option<&TransactionEvent> {
        match self {
            Event::Transaction(tx) => Some(tx),
            Event::Span(_) => None,
        }
    }

    pub fn as_span(&self) -> Option<&SpanEvent> {
        match self {
            Event::Span(span) => Some(span),
            Event::Transaction(_) => None,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        match self {
            Event::Transaction(tx) => tx.trace_id,
            Event::Span(span) => span.trace_id,
        }
    }
}

/// Sink for ended transactions and spans.
pub trait Reporter: Send + Sync + Debug {
    fn report(&self, event: Event);
}

/// Writes each event as one JSON log line on the `gateway_apm::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "gateway_apm::events", event = %json, "APM event"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize APM event"),
        }
    }
}

/// Forwards events into an unbounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::warn!("APM event receiver dropped, discarding event");
        }
    }
}
