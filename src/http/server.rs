//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Wire up middleware (tracing, request ID)
//! - Run the APM plugin's access and response phases around each request
//! - Forward requests to the configured upstream service within the request timeout
//! - Emit one log record per finished request in log mode
//! - Apply configuration reloads

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, uri::Authority, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ApmConfig, GatewayConfig, TracingMode};
use crate::correlator::TracingPlugin;
use crate::gateway::{Exchange, Headers, ServiceDescriptor};
use crate::reconstruct::LogRecord;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub plugin: Arc<TracingPlugin>,
    pub service: Arc<ArcSwap<ServiceDescriptor>>,
    pub client: Client<HttpConnector, Body>,
    /// Upper bound on the upstream exchange, connect included.
    pub request_timeout: Duration,
    pub log_records: Option<mpsc::UnboundedSender<LogRecord>>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
}

impl HttpServer {
    /// Create a new HTTP server.
    ///
    /// In log mode, `log_records` receives one record per finished request;
    /// pass `None` when no reconstruction worker is running.
    pub fn new(
        config: &GatewayConfig,
        plugin: Arc<TracingPlugin>,
        log_records: Option<mpsc::UnboundedSender<LogRecord>>,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            plugin,
            service: Arc::new(ArcSwap::from_pointee(config.service.clone())),
            client,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            log_records,
        };

        let router = Self::build_router(state.clone());
        Self {
            router,
            state,
            config_updates: None,
        }
    }

    /// Apply configurations received on `updates` while the server runs.
    pub fn with_config_updates(mut self, updates: mpsc::UnboundedReceiver<GatewayConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// There is no router-level timeout: the handler bounds the upstream call
    /// itself, so every request that reaches it also reaches the response phase.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(mut updates) = self.config_updates {
            let state = self.state.clone();
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    tracing::info!(service = %config.service.name, "Applying reloaded configuration");
                    if log_records_unavailable(&config.apm, state.log_records.is_some()) {
                        tracing::warn!(
                            "Reloaded configuration enables log mode, but no reconstruction worker is running; restart the gateway to emit log records"
                        );
                    }
                    state.service.store(Arc::new(config.service));
                    state.plugin.update_config(config.apm);
                }
            });
        }

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Runs the access phase, forwards upstream, then runs the response phase.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started_at = SystemTime::now();
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();

    let (host, port) = forwarded_authority(&parts.headers, &parts.uri);
    let service = state.service.load_full();
    let mut exchange = Exchange::new(
        parts.method.as_str(),
        "http",
        host,
        port,
        parts.uri.path(),
        Headers::from(&parts.headers),
    )
    .with_service((*service).clone());

    state.plugin.access(&mut exchange);

    let upstream_uri = match upstream_uri(&service, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(service = %service.name, error = %e, "Invalid upstream URI");
            let (_, response) =
                failed_exchange(&mut exchange, StatusCode::BAD_GATEWAY, "Invalid upstream address");
            state.plugin.response(&exchange);
            return response;
        }
    };

    let mut outbound = exchange.outbound_request_headers().to_header_map();
    outbound.remove(header::HOST);

    let mut upstream = Request::new(body);
    *upstream.method_mut() = parts.method.clone();
    *upstream.uri_mut() = upstream_uri;
    *upstream.version_mut() = parts.version;
    *upstream.headers_mut() = outbound;

    tracing::debug!(
        method = %parts.method,
        upstream = %upstream.uri(),
        "Forwarding request"
    );

    let proxy_start = Instant::now();
    let result: Result<Result<Response<Incoming>, _>, _> =
        tokio::time::timeout(state.request_timeout, state.client.request(upstream)).await;
    let proxy_latency = proxy_start.elapsed();

    let (status, response) = match result {
        Ok(Ok(response)) => {
            let status = response.status().as_u16();
            let headers = Headers::from(response.headers());
            exchange.record_service_response(status, headers.clone());
            exchange.record_response_headers(headers);

            let (parts, body) = response.into_parts();
            (status, Response::from_parts(parts, Body::new(body)))
        }
        Ok(Err(e)) => {
            tracing::error!(service = %service.name, error = %e, "Upstream error");
            failed_exchange(&mut exchange, StatusCode::BAD_GATEWAY, "Upstream request failed")
        }
        Err(_) => {
            tracing::error!(
                service = %service.name,
                timeout_secs = state.request_timeout.as_secs(),
                "Upstream request timed out"
            );
            failed_exchange(
                &mut exchange,
                StatusCode::GATEWAY_TIMEOUT,
                "Upstream request timed out",
            )
        }
    };

    state.plugin.response(&exchange);

    let log_mode = state.plugin.config().mode == TracingMode::Log;
    if let Some(records) = state.log_records.as_ref().filter(|_| log_mode) {
        let mut record = LogRecord::from_exchange(
            &exchange,
            started_at,
            start_time.elapsed(),
            proxy_latency,
            status,
            Headers::from(response.headers()),
        );
        record.client_ip = Some(client_addr.ip().to_string());
        if records.send(record).is_err() {
            tracing::warn!("Log record receiver dropped");
        }
    }

    response
}

/// Record a gateway-generated error as the service response, so the trace
/// ends with the status the client gets.
fn failed_exchange(
    exchange: &mut Exchange,
    status: StatusCode,
    message: &'static str,
) -> (u16, Response) {
    exchange.record_service_response(status.as_u16(), Headers::new());
    exchange.record_response_headers(Headers::new());
    (status.as_u16(), (status, message).into_response())
}

/// True when `apm` asks for log records the running server has no worker for.
fn log_records_unavailable(apm: &ApmConfig, has_worker: bool) -> bool {
    apm.active && apm.mode == TracingMode::Log && !has_worker
}

/// Host and port the client addressed, from `Host` or the absolute URI.
fn forwarded_authority(headers: &axum::http::HeaderMap, uri: &Uri) -> (String, u16) {
    let authority = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Authority::from_str(v).ok())
        .or_else(|| uri.authority().cloned());

    match authority {
        Some(authority) => (
            authority.host().to_string(),
            authority.port_u16().unwrap_or(80),
        ),
        None => (String::new(), 80),
    }
}

/// Upstream URI: service address, service path prefix, then the request path and query.
fn upstream_uri(
    service: &ServiceDescriptor,
    inbound: &Uri,
) -> Result<Uri, axum::http::uri::InvalidUri> {
    let prefix = service.path.trim_end_matches('/');
    let path_and_query = inbound
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    // plain HTTP connector; the protocol field only labels the span
    Uri::from_str(&format!(
        "http://{}:{}{}{}",
        service.host, service.port, prefix, path_and_query
    ))
}
