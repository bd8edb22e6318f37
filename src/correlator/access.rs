//! Access phase: runs when a request enters the gateway.
//!
//! # Responsibilities
//! - Continue the inbound trace or start a new one
//! - Leave a correlation token for the response phase
//! - Open the upstream span and propagate its context (sampled only)
//! - In log mode, stamp the headers the reconstructor will read back

use crate::apm::{SpanOptions, Tracer, TransactionOptions};
use crate::config::TracingMode;
use crate::correlator::{
    extract_context, inject_context, TracingPlugin, CORRELATION_TOKEN_KEY, SPAN_KIND,
    TRANSACTION_KIND,
};
use crate::gateway::accessors::ask;
use crate::gateway::GatewayContext;
use crate::observability::metrics;
use crate::propagation::{SpanId, TraceParent, TRACEPARENT_HEADER};
use crate::registry::CorrelationToken;

impl TracingPlugin {
    /// Run the access phase for one request.
    pub fn access(&self, ctx: &mut dyn GatewayContext) {
        let config = self.config();
        if !config.active {
            return;
        }

        match config.mode {
            TracingMode::Sync => match self.tracer() {
                Ok(tracer) => self.correlate(tracer, ctx),
                Err(e) => tracing::error!(error = %e, "APM tracer unavailable, request not traced"),
            },
            TracingMode::Log => stamp_for_reconstruction(ctx, &config.prior_hop_header),
        }
    }

    fn correlate(&self, tracer: &Tracer, ctx: &mut dyn GatewayContext) {
        let headers = ask("request_headers", ctx.request_headers());
        let (origin, trace_state) = extract_context(&headers);

        let method = ask("request_method", ctx.request_method());
        let name = format!(
            "{} {}:{}{}",
            method,
            ask("forwarded_host", ctx.forwarded_host()),
            ask("forwarded_port", ctx.forwarded_port()),
            ask("forwarded_path", ctx.forwarded_path()),
        );

        let transaction = tracer.start_transaction(
            name,
            TRANSACTION_KIND,
            TransactionOptions {
                origin,
                trace_state,
                start: None,
            },
        );

        let token = CorrelationToken::new();
        tracing::info!(
            token = %token,
            trace_id = %transaction.trace_id(),
            transaction_id = %transaction.id(),
            sampled = transaction.is_sampled(),
            "Started transaction"
        );

        if let Err(e) = ctx.set_shared(CORRELATION_TOKEN_KEY, token.to_string()) {
            tracing::error!(
                token = %token,
                error = %e,
                "Error saving correlation token in shared context, transaction discarded"
            );
            return;
        }

        if !transaction.is_sampled() {
            // identity only: the next hop still joins this trace
            inject_context(ctx, transaction.trace_parent(), transaction.trace_state());
            self.registry().put(token, transaction, None);
            return;
        }

        let service = match ctx.service() {
            Ok(service) => service,
            Err(e) => {
                tracing::error!(token = %token, error = %e, "Error getting service from router");
                self.registry().put(token, transaction, None);
                return;
            }
        };

        let span_name = format!(
            "{} {}:{}{}",
            method, service.host, service.port, service.path
        );
        let Some(mut span) = transaction.start_span(span_name, SPAN_KIND, SpanOptions::default())
        else {
            self.registry().put(token, transaction, None);
            return;
        };

        span.set_action(method.as_str());
        span.set_subtype(service.protocol.as_str());
        span.set_destination_address(service.host.as_str(), service.port);

        inject_context(ctx, span.trace_parent(), transaction.trace_state());
        tracing::info!(token = %token, span_id = %span.id(), "Started span");

        self.registry().put(token, transaction, Some(span));
    }
}

/// Log mode: give the upstream request a fresh hop span id and keep the
/// caller's `traceparent` in `prior_hop_header`.
///
/// Both land in the access-log record, which is all the reconstructor sees.
fn stamp_for_reconstruction(ctx: &mut dyn GatewayContext, prior_hop_header: &str) {
    let headers = ask("request_headers", ctx.request_headers());
    let Some(value) = headers.first(TRACEPARENT_HEADER) else {
        tracing::debug!("No traceparent on request, nothing to stamp");
        return;
    };

    let caller = match value.parse::<TraceParent>() {
        Ok(parent) => parent,
        Err(e) => {
            tracing::error!(traceparent = %value, error = %e, "Ignoring malformed traceparent header");
            metrics::record_propagation_error("traceparent");
            return;
        }
    };

    let outbound = caller.with_span_id(SpanId::random());
    if let Err(e) = ctx.set_upstream_header(prior_hop_header, value) {
        tracing::error!(header = %prior_hop_header, error = %e, "Error setting prior-hop header");
        return;
    }
    if let Err(e) = ctx.set_upstream_header(TRACEPARENT_HEADER, &outbound.to_string()) {
        tracing::error!(error = %e, "Error setting traceparent header to service request");
        return;
    }

    tracing::debug!(
        trace_id = %outbound.trace_id,
        span_id = %outbound.span_id,
        "Stamped request for reconstruction"
    );
}
