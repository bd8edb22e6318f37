//! Rebuild a finished request's transaction and span from its log record.
//!
//! # Design Decisions
//! - No live state is consulted: identity comes from the logged headers,
//!   timing from the latency breakdown
//! - Both items are created and ended in one pass
//! - A bad record is logged and dropped; it never stops the pipeline

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use url::Url;

use crate::apm::{HttpRequestContext, SpanOptions, TraceOrigin, Tracer, TransactionOptions};
use crate::correlator::{SPAN_KIND, TRANSACTION_KIND};
use crate::observability::metrics;
use crate::propagation::{
    PropagationError, SpanId, TraceId, TraceParent, TraceState, TRACEPARENT_HEADER,
    TRACESTATE_HEADER,
};
use crate::reconstruct::record::LogRecord;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("malformed log record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {header} header: {source}")]
    Header {
        header: String,
        #[source]
        source: PropagationError,
    },

    #[error("log record has no {0}")]
    MissingField(&'static str),

    #[error("invalid request url {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconstruction {
    /// No `traceparent` was logged; nothing to correlate.
    Skipped,
    /// The transaction was not sampled; nothing was reported.
    Unsampled { trace_id: TraceId },
    Reported {
        trace_id: TraceId,
        transaction_id: SpanId,
        span_id: SpanId,
    },
}

impl Reconstruction {
    fn label(&self) -> &'static str {
        match self {
            Reconstruction::Skipped => "skipped",
            Reconstruction::Unsampled { .. } => "unsampled",
            Reconstruction::Reported { .. } => "reported",
        }
    }
}

/// Timing derived from a record's latency breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructedTiming {
    pub transaction_start: SystemTime,
    pub transaction_duration: Duration,
    pub span_start: SystemTime,
    pub span_duration: Duration,
}

impl ReconstructedTiming {
    /// The upstream call's real start is not logged. It is approximated as the
    /// midpoint of the gateway's own processing time.
    pub fn from_record(record: &LogRecord) -> Self {
        let transaction_start = record.started_at();
        let total = record.latencies.request();
        let internal = record.latencies.gateway();

        Self {
            transaction_start,
            transaction_duration: total,
            span_start: transaction_start + internal / 2,
            span_duration: total.saturating_sub(internal),
        }
    }
}

pub struct Reconstructor {
    tracer: Arc<Tracer>,
    prior_hop_header: String,
}

impl Reconstructor {
    pub fn new(tracer: Arc<Tracer>, prior_hop_header: impl Into<String>) -> Self {
        Self {
            tracer,
            prior_hop_header: prior_hop_header.into().to_ascii_lowercase(),
        }
    }

    /// Parse one NDJSON line and process it. Errors are logged, never returned.
    pub fn process_line(&self, line: &str) -> Option<Reconstruction> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match LogRecord::from_json(line) {
            Ok(record) => self.process(&record),
            Err(e) => {
                tracing::error!(error = %e, "Dropping malformed log record");
                metrics::record_reconstruction("failed");
                None
            }
        }
    }

    /// Process one record. Errors are logged, never returned.
    pub fn process(&self, record: &LogRecord) -> Option<Reconstruction> {
        match self.reconstruct(record) {
            Ok(outcome) => {
                metrics::record_reconstruction(outcome.label());
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(
                    method = %record.request.method,
                    url = %record.request.url,
                    error = %e,
                    "Error reconstructing trace from log record"
                );
                metrics::record_reconstruction("failed");
                None
            }
        }
    }

    pub fn reconstruct(&self, record: &LogRecord) -> Result<Reconstruction, ReconstructError> {
        let headers = &record.request.headers;
        let Some(value) = headers.first(TRACEPARENT_HEADER) else {
            tracing::debug!(url = %record.request.url, "No traceparent in log record, skipping");
            return Ok(Reconstruction::Skipped);
        };

        let hop = parse_header(TRACEPARENT_HEADER, value)?;
        let service = record
            .service
            .as_ref()
            .ok_or(ReconstructError::MissingField("service"))?;

        let caller = match headers.first(&self.prior_hop_header) {
            Some(prior) => Some(parse_header(&self.prior_hop_header, prior)?),
            None => None,
        };
        let origin = match caller {
            Some(caller) if caller.trace_id == hop.trace_id => TraceOrigin::Continue(caller),
            other => {
                if let Some(caller) = other {
                    tracing::warn!(
                        prior = %caller.trace_id,
                        request = %hop.trace_id,
                        "Prior-hop trace does not match request trace, using the request trace"
                    );
                }
                TraceOrigin::Adopt(TraceParent::new(
                    hop.trace_id,
                    SpanId::random(),
                    hop.flags.with_sampled(true),
                ))
            }
        };

        let url = Url::parse(&record.request.url).map_err(|source| ReconstructError::InvalidUrl {
            url: record.request.url.clone(),
            source,
        })?;
        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port_or_known_default().unwrap_or_default();
        let method = record.request.method.as_str();

        let trace_state = match TraceState::parse(headers.get_all(TRACESTATE_HEADER)) {
            Ok(state) if !state.is_empty() => Some(state),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid tracestate in log record");
                None
            }
        };

        let timing = ReconstructedTiming::from_record(record);
        let mut transaction = self.tracer.start_transaction(
            format!("{} {}:{}{}", method, host, port, url.path()),
            TRANSACTION_KIND,
            TransactionOptions {
                origin,
                trace_state,
                start: Some(timing.transaction_start),
            },
        );

        let span_name = format!(
            "{} {}:{}{}",
            method, service.host, service.port, service.path
        );
        let Some(mut span) = transaction.start_span(
            span_name,
            SPAN_KIND,
            SpanOptions {
                start: Some(timing.span_start),
                id: Some(hop.span_id),
            },
        ) else {
            tracing::info!(
                trace_id = %transaction.trace_id(),
                "Reconstructed transaction is not sampled, nothing to report"
            );
            return Ok(Reconstruction::Unsampled {
                trace_id: transaction.trace_id(),
            });
        };

        let status = record.response.status;

        span.set_action(method);
        span.set_subtype(service.protocol.as_str());
        span.set_destination_address(service.host.as_str(), service.port);
        span.set_destination_service(service.resource());
        span.set_http_request(HttpRequestContext::new(
            method,
            &service.url(),
            service.host.clone(),
        ));
        span.set_http_status_code(status);
        let span_id = span.id();
        span.end_with_duration(timing.span_duration);

        transaction.set_http_request(
            HttpRequestContext::new(method, url.as_str(), host).with_headers(headers.clone()),
        );
        transaction.set_http_response(status, record.response.headers.clone());
        transaction.set_result(format!("HTTP {status}"));

        let outcome = Reconstruction::Reported {
            trace_id: transaction.trace_id(),
            transaction_id: transaction.id(),
            span_id,
        };
        tracing::debug!(outcome = ?outcome, "Reconstructed trace from log record");
        transaction.end_with_duration(timing.transaction_duration);

        Ok(outcome)
    }
}

fn parse_header(header: &str, value: &str) -> Result<TraceParent, ReconstructError> {
    value.parse().map_err(|source| ReconstructError::Header {
        header: header.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::{ChannelReporter, Event, Outcome};
    use crate::config::ApmConfig;
    use crate::gateway::{Headers, ServiceDescriptor};
    use crate::reconstruct::record::{Latencies, RequestRecord, ResponseRecord};
    use std::time::UNIX_EPOCH;
    use tokio::sync::mpsc::UnboundedReceiver;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
    const PRIOR: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-b7ad6b7169203331-01";

    fn reconstructor() -> (Reconstructor, UnboundedReceiver<Event>) {
        let (reporter, rx) = ChannelReporter::new();
        let config = ApmConfig {
            active: true,
            ..ApmConfig::default()
        };
        let tracer = Tracer::new(&config, Arc::new(reporter)).unwrap();
        (
            Reconstructor::new(Arc::new(tracer), config.prior_hop_header),
            rx,
        )
    }

    fn record(headers: Headers, status: u16) -> LogRecord {
        LogRecord {
            started_at: 1_700_000_000_000,
            latencies: Latencies {
                request: 120,
                gateway: 20,
                proxy: 100,
            },
            request: RequestRecord {
                method: "GET".into(),
                url: "http://gw.example.com:8000/orders".into(),
                headers,
            },
            response: ResponseRecord {
                status,
                headers: Headers::new(),
            },
            service: Some(ServiceDescriptor {
                name: "orders".into(),
                host: "orders.internal".into(),
                port: 8080,
                path: "/v1".into(),
                protocol: "http".into(),
            }),
            client_ip: None,
        }
    }

    fn traced(traceparent: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set(TRACEPARENT_HEADER, traceparent);
        headers
    }

    #[test]
    fn test_timing_from_latency_breakdown() {
        let timing = ReconstructedTiming::from_record(&record(Headers::new(), 200));
        let start = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);

        assert_eq!(timing.transaction_start, start);
        assert_eq!(timing.transaction_duration, Duration::from_millis(120));
        assert_eq!(timing.span_start, start + Duration::from_millis(10));
        assert_eq!(timing.span_duration, Duration::from_millis(100));
    }

    #[test]
    fn test_timing_keeps_sub_millisecond_midpoint() {
        let mut rec = record(Headers::new(), 200);
        rec.latencies.gateway = 21;
        let timing = ReconstructedTiming::from_record(&rec);
        assert_eq!(
            timing.span_start,
            timing.transaction_start + Duration::from_micros(10_500)
        );
    }

    #[test]
    fn test_internal_latency_above_total_clamps_span_duration() {
        let mut rec = record(Headers::new(), 200);
        rec.latencies.gateway = 200;
        assert_eq!(
            ReconstructedTiming::from_record(&rec).span_duration,
            Duration::ZERO
        );
    }

    #[test]
    fn test_record_without_traceparent_is_skipped() {
        let (reconstructor, mut rx) = reconstructor();
        let outcome = reconstructor.reconstruct(&record(Headers::new(), 200)).unwrap();
        assert_eq!(outcome, Reconstruction::Skipped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_without_prior_hop_adopts_primary_trace() {
        let (reconstructor, mut rx) = reconstructor();
        let outcome = reconstructor.reconstruct(&record(traced(TRACEPARENT), 503)).unwrap();

        let Reconstruction::Reported { trace_id, span_id, .. } = outcome else {
            panic!("expected a reported trace, got {outcome:?}");
        };
        assert_eq!(trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span_id.to_string(), "00f067aa0ba902b7");

        let span = rx.try_recv().unwrap();
        let span = span.as_span().unwrap();
        assert_eq!(span.status_code(), Some(503));
        assert_eq!(span.outcome, Outcome::Failure);
        assert_eq!(span.timestamp, 1_700_000_000_010_000);
        assert_eq!(span.duration, 100.0);
        assert_eq!(span.name, "GET orders.internal:8080/v1");

        let tx = rx.try_recv().unwrap();
        let tx = tx.as_transaction().unwrap();
        assert!(tx.sampled);
        assert_eq!(tx.parent_id, None);
        assert_eq!(tx.result.as_deref(), Some("HTTP 503"));
        assert_eq!(tx.timestamp, 1_700_000_000_000_000);
        assert_eq!(tx.duration, 120.0);
        assert_eq!(tx.name, "GET gw.example.com:8000/orders");
        assert_eq!(span.transaction_id, tx.id);
    }

    #[test]
    fn test_prior_hop_header_becomes_transaction_parent() {
        let (reconstructor, mut rx) = reconstructor();
        let mut headers = traced(TRACEPARENT);
        headers.set("x-gateway-prior-traceparent", PRIOR);
        reconstructor.reconstruct(&record(headers, 200)).unwrap();

        let _span = rx.try_recv().unwrap();
        let tx = rx.try_recv().unwrap();
        let tx = tx.as_transaction().unwrap();
        assert_eq!(tx.parent_id.map(|id| id.to_string()).as_deref(), Some("b7ad6b7169203331"));
    }

    #[test]
    fn test_prior_hop_from_other_trace_falls_back_to_primary() {
        let (reconstructor, mut rx) = reconstructor();
        let mut headers = traced(TRACEPARENT);
        headers.set(
            "x-gateway-prior-traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        );
        let outcome = reconstructor.reconstruct(&record(headers, 200)).unwrap();

        let Reconstruction::Reported { trace_id, .. } = outcome else {
            panic!("expected a reported trace, got {outcome:?}");
        };
        assert_eq!(trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");

        let _span = rx.try_recv().unwrap();
        let tx = rx.try_recv().unwrap();
        let tx = tx.as_transaction().unwrap();
        assert_eq!(tx.parent_id, None);
        assert!(tx.sampled);
    }

    #[test]
    fn test_unsampled_prior_hop_reports_nothing() {
        let (reconstructor, mut rx) = reconstructor();
        let mut headers = traced(TRACEPARENT);
        headers.set(
            "x-gateway-prior-traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-b7ad6b7169203331-00",
        );
        let outcome = reconstructor.reconstruct(&record(headers, 200)).unwrap();
        assert!(matches!(outcome, Reconstruction::Unsampled { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bad_records_fail_without_reporting() {
        let (reconstructor, mut rx) = reconstructor();

        assert!(matches!(
            reconstructor.reconstruct(&record(traced("00-zz-00f067aa0ba902b7-01"), 200)),
            Err(ReconstructError::Header { .. })
        ));

        let mut no_service = record(traced(TRACEPARENT), 200);
        no_service.service = None;
        assert!(matches!(
            reconstructor.reconstruct(&no_service),
            Err(ReconstructError::MissingField("service"))
        ));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_process_line_survives_garbage() {
        let (reconstructor, _rx) = reconstructor();
        assert_eq!(reconstructor.process_line("{not json"), None);
        assert_eq!(reconstructor.process_line("   "), None);
    }
}
