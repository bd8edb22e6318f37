//! Response phase: runs once the upstream has answered.
//!
//! # Responsibilities
//! - Find the request's active trace through the correlation token
//! - Enrich and end the span, then the transaction
//!
//! # Design Decisions
//! - Span and transaction are finalized independently; a failure enriching
//!   one never stops the other from ending
//! - The entry is removed before enrichment, so a repeated response phase
//!   finds nothing and cannot end anything twice
//! - Any entry the token points at is finalized, even if a reload switched
//!   tracing off or to log mode after the access phase ran

use crate::apm::{HttpRequestContext, Span, Transaction};
use crate::config::TracingMode;
use crate::correlator::{TracingPlugin, CORRELATION_TOKEN_KEY};
use crate::gateway::accessors::ask;
use crate::gateway::service::join_url;
use crate::gateway::GatewayContext;
use crate::registry::CorrelationToken;

impl TracingPlugin {
    /// Run the response phase for one request.
    pub fn response(&self, ctx: &dyn GatewayContext) {
        let config = self.config();
        let live = config.active && config.mode == TracingMode::Sync;

        let raw = match ctx.get_shared(CORRELATION_TOKEN_KEY) {
            Ok(raw) => raw,
            Err(e) if live => {
                tracing::error!(error = %e, "Error getting correlation token from shared context");
                return;
            }
            Err(_) => return,
        };
        let token: CorrelationToken = match raw.parse() {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(token = %raw, error = %e, "Malformed correlation token in shared context");
                return;
            }
        };

        let Some(entry) = self.registry().remove(&token) else {
            tracing::debug!(token = %token, "No active trace for token");
            return;
        };

        let status = match ask("service_response_status", ctx.service_response_status()) {
            0 => None,
            code => Some(code),
        };
        let method = ask("request_method", ctx.request_method());

        if let Some(span) = entry.span {
            finalize_span(ctx, span, &method, status, &token);
        }
        finalize_transaction(ctx, entry.transaction, &method, status, &token);
    }
}

fn finalize_span(
    ctx: &dyn GatewayContext,
    mut span: Span,
    method: &str,
    status: Option<u16>,
    token: &CorrelationToken,
) {
    match ctx.service() {
        Ok(service) => {
            span.set_http_request(HttpRequestContext::new(
                method,
                &service.url(),
                service.host.clone(),
            ));
            span.set_destination_service(service.resource());
        }
        Err(e) => {
            tracing::error!(token = %token, error = %e, "Error getting service from router, span ends without destination service");
        }
    }

    span.set_http_response_headers(ask(
        "service_response_headers",
        ctx.service_response_headers(),
    ));
    if let Some(code) = status {
        span.set_http_status_code(code);
    }

    tracing::info!(token = %token, span_id = %span.id(), "Ending span");
    span.end();
}

fn finalize_transaction(
    ctx: &dyn GatewayContext,
    mut transaction: Transaction,
    method: &str,
    status: Option<u16>,
    token: &CorrelationToken,
) {
    let scheme = ask("forwarded_scheme", ctx.forwarded_scheme());
    let host = ask("forwarded_host", ctx.forwarded_host());
    let port = ask("forwarded_port", ctx.forwarded_port());
    let path = ask("forwarded_path", ctx.forwarded_path());
    let url = join_url(&scheme, &host, port, &path);

    transaction.set_http_request(
        HttpRequestContext::new(method, &url, host)
            .with_headers(ask("request_headers", ctx.request_headers())),
    );

    if let Some(code) = status {
        transaction.set_http_response(code, ask("response_headers", ctx.response_headers()));
        transaction.set_result(format!("HTTP {code}"));
    }

    tracing::info!(
        token = %token,
        transaction_id = %transaction.id(),
        result = ?transaction.result(),
        "Ending transaction"
    );
    transaction.end();
}
