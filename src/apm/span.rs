//! Spans: the outbound call from this hop to the upstream service.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::apm::context::{
    duration_ms, epoch_micros, Destination, HttpRequestContext, HttpResponseContext, Outcome,
};
use crate::apm::reporter::{Event, Reporter, SpanContext, SpanEvent, SpanHttpContext};
use crate::gateway::Headers;
use crate::observability::metrics;
use crate::propagation::{SpanId, TraceFlags, TraceId, TraceParent};

#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    /// Backdated start; defaults to now.
    pub start: Option<SystemTime>,
    /// Use this id instead of a random one, when the id already went out on the wire.
    pub id: Option<SpanId>,
}

/// An open span, owned by whoever will end it.
pub struct Span {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) subtype: Option<String>,
    pub(crate) action: Option<String>,
    pub(crate) trace_id: TraceId,
    pub(crate) id: SpanId,
    pub(crate) parent_id: SpanId,
    pub(crate) transaction_id: SpanId,
    pub(crate) flags: TraceFlags,
    pub(crate) start: SystemTime,
    pub(crate) started: Instant,
    pub(crate) destination: Option<Destination>,
    pub(crate) request: Option<HttpRequestContext>,
    pub(crate) response: Option<HttpResponseContext>,
    pub(crate) capture_headers: bool,
    pub(crate) reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("trace_id", &self.trace_id)
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

impl Span {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn parent_id(&self) -> SpanId {
        self.parent_id
    }

    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Header value for the request this span represents.
    pub fn trace_parent(&self) -> TraceParent {
        TraceParent::new(self.trace_id, self.id, self.flags)
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    pub fn set_subtype(&mut self, subtype: impl Into<String>) {
        self.subtype = Some(subtype.into());
    }

    pub fn set_destination_address(&mut self, address: impl Into<String>, port: u16) {
        let destination = self.destination.get_or_insert_with(Destination::default);
        destination.address = Some(address.into());
        destination.port = Some(port);
    }

    pub fn set_destination_service(&mut self, resource: impl Into<String>) {
        self.destination
            .get_or_insert_with(Destination::default)
            .service_resource = Some(resource.into());
    }

    pub fn set_http_request(&mut self, mut request: HttpRequestContext) {
        if !self.capture_headers {
            request.headers = Headers::new();
        }
        self.request = Some(request);
    }

    pub fn set_http_status_code(&mut self, status_code: u16) {
        self.response
            .get_or_insert_with(HttpResponseContext::default)
            .status_code = Some(status_code);
    }

    pub fn set_http_response_headers(&mut self, headers: Headers) {
        if self.capture_headers {
            self.response
                .get_or_insert_with(HttpResponseContext::default)
                .headers = headers;
        }
    }

    pub fn end(self) {
        let duration = self.started.elapsed();
        self.end_with_duration(duration);
    }

    pub fn end_with_duration(self, duration: Duration) {
        let status = self.response.as_ref().and_then(|r| r.status_code);
        let http = if self.request.is_some() || self.response.is_some() {
            Some(SpanHttpContext {
                request: self.request,
                response: self.response,
            })
        } else {
            None
        };

        tracing::debug!(
            trace_id = %self.trace_id,
            span_id = %self.id,
            name = %self.name,
            status = ?status,
            "Ending span"
        );

        let event = SpanEvent {
            id: self.id,
            trace_id: self.trace_id,
            parent_id: self.parent_id,
            transaction_id: self.transaction_id,
            name: self.name,
            kind: self.kind,
            subtype: self.subtype,
            action: self.action,
            outcome: Outcome::for_span(status),
            timestamp: epoch_micros(self.start),
            duration: duration_ms(duration),
            context: SpanContext {
                destination: self.destination,
                http,
            },
        };

        metrics::record_span_ended();
        self.reporter.report(Event::Span(event));
    }
}
