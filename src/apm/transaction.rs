//! Transactions: the root unit of work for one request at this hop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::apm::context::{
    duration_ms, epoch_micros, HttpRequestContext, HttpResponseContext, Outcome,
};
use crate::apm::reporter::{Event, Reporter, TransactionContext, TransactionEvent};
use crate::apm::span::{Span, SpanOptions};
use crate::gateway::Headers;
use crate::observability::metrics;
use crate::propagation::{SpanId, TraceFlags, TraceId, TraceParent, TraceState};

/// An open transaction. Created by [`Tracer::start_transaction`], closed by [`Transaction::end`].
///
/// [`Tracer::start_transaction`]: crate::apm::Tracer::start_transaction
pub struct Transaction {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) trace_id: TraceId,
    pub(crate) id: SpanId,
    pub(crate) parent_id: Option<SpanId>,
    pub(crate) flags: TraceFlags,
    pub(crate) trace_state: Option<TraceState>,
    pub(crate) start: SystemTime,
    pub(crate) started: Instant,
    pub(crate) result: Option<String>,
    pub(crate) request: Option<HttpRequestContext>,
    pub(crate) response: Option<HttpResponseContext>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) capture_headers: bool,
    pub(crate) reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("trace_id", &self.trace_id)
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("sampled", &self.is_sampled())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    pub fn flags(&self) -> TraceFlags {
        self.flags
    }

    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    pub fn start(&self) -> SystemTime {
        self.start
    }

    pub fn trace_state(&self) -> Option<&TraceState> {
        self.trace_state.as_ref()
    }

    /// Context to propagate when this transaction itself is the parent.
    pub fn trace_parent(&self) -> TraceParent {
        TraceParent::new(self.trace_id, self.id, self.flags)
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn set_result(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
    }

    pub fn set_http_request(&mut self, mut request: HttpRequestContext) {
        if !self.capture_headers {
            request.headers = Headers::new();
        }
        self.request = Some(request);
    }

    pub fn set_http_response(&mut self, status_code: u16, headers: Headers) {
        let headers = if self.capture_headers {
            headers
        } else {
            Headers::new()
        };
        self.response = Some(HttpResponseContext {
            status_code: Some(status_code),
            headers,
        });
    }

    /// Start a child span. Unsampled transactions never have spans.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        options: SpanOptions,
    ) -> Option<Span> {
        if !self.is_sampled() {
            return None;
        }

        metrics::record_span_started();

        Some(Span {
            name: name.into(),
            kind: kind.into(),
            subtype: None,
            action: None,
            trace_id: self.trace_id,
            id: options.id.unwrap_or_else(SpanId::random),
            parent_id: self.id,
            transaction_id: self.id,
            flags: self.flags,
            start: options.start.unwrap_or_else(SystemTime::now),
            started: Instant::now(),
            destination: None,
            request: None,
            response: None,
            capture_headers: self.capture_headers,
            reporter: self.reporter.clone(),
        })
    }

    /// End now, measuring duration from when the transaction was started.
    pub fn end(self) {
        let duration = self.started.elapsed();
        self.end_with_duration(duration);
    }

    /// End with an explicit duration, for transactions rebuilt after the fact.
    pub fn end_with_duration(self, duration: Duration) {
        let status = self.response.as_ref().and_then(|r| r.status_code);
        let sampled = self.is_sampled();

        let context = if sampled {
            Some(TransactionContext {
                request: self.request,
                response: self.response,
                labels: self.labels,
            })
        } else {
            None
        };

        tracing::debug!(
            trace_id = %self.trace_id,
            transaction_id = %self.id,
            name = %self.name,
            result = ?self.result,
            "Ending transaction"
        );

        let event = TransactionEvent {
            id: self.id,
            trace_id: self.trace_id,
            parent_id: self.parent_id,
            name: self.name,
            kind: self.kind,
            result: self.result,
            outcome: Outcome::for_transaction(status),
            sampled,
            timestamp: epoch_micros(self.start),
            duration: duration_ms(duration),
            context,
        };

        metrics::record_transaction_ended();
        self.reporter.report(Event::Transaction(event));
    }
}
