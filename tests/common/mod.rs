//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gateway_apm::apm::{ChannelReporter, Event};
use gateway_apm::config::{ApmConfig, GatewayConfig, TimeoutConfig};
use gateway_apm::gateway::ServiceDescriptor;
use gateway_apm::reconstruct::ReconstructionWorker;
use gateway_apm::{HttpServer, Shutdown, TracingPlugin};

pub const INBOUND_TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const INBOUND_SPAN_ID: &str = "00f067aa0ba902b7";

pub fn inbound_traceparent(flags: &str) -> String {
    format!("00-{INBOUND_TRACE_ID}-{INBOUND_SPAN_ID}-{flags}")
}

/// Request headers seen by a mock backend, names lowercased.
pub type RecordedHeaders = HashMap<String, String>;

/// Mock backend that records each request's headers and answers with a fixed status.
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedHeaders>>>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<RecordedHeaders> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> RecordedHeaders {
        self.requests().pop().expect("backend received no request")
    }
}

pub async fn start_recording_backend(status: u16) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = socket.into_split();
                        let mut lines = BufReader::new(read).lines();
                        let mut headers = RecordedHeaders::new();

                        // request line, then headers up to the blank line
                        let _ = lines.next_line().await;
                        while let Ok(Some(line)) = lines.next_line().await {
                            if line.is_empty() {
                                break;
                            }
                            if let Some((name, value)) = line.split_once(':') {
                                headers.insert(
                                    name.trim().to_ascii_lowercase(),
                                    value.trim().to_string(),
                                );
                            }
                        }
                        recorded.lock().unwrap().push(headers);

                        let body = "ok";
                        let response = format!(
                            "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = write.write_all(response.as_bytes()).await;
                        let _ = write.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, requests }
}

/// Backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// A gateway running in the background with a channel reporter.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub plugin: Arc<TracingPlugin>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait for the next reported event.
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for APM event")
            .expect("event channel closed")
    }

    /// Assert nothing else is reported within a short grace period.
    pub async fn assert_no_more_events(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(next.is_err(), "unexpected APM event: {:?}", next);
    }
}

pub fn apm_config() -> ApmConfig {
    ApmConfig {
        active: true,
        service_name: "gateway-test".into(),
        ..ApmConfig::default()
    }
}

/// Start a gateway forwarding to `backend`. A reconstruction worker runs
/// whenever tracing is active, as in the real binary.
pub async fn start_gateway(apm: ApmConfig, backend: SocketAddr) -> TestGateway {
    start_gateway_with_timeouts(apm, backend, TimeoutConfig::default()).await
}

pub async fn start_gateway_with_timeouts(
    apm: ApmConfig,
    backend: SocketAddr,
    timeouts: TimeoutConfig,
) -> TestGateway {
    let mut config = GatewayConfig::default();
    config.timeouts = timeouts;
    config.listener.bind_address = "127.0.0.1:0".into();
    config.service = ServiceDescriptor {
        name: "backend".into(),
        host: backend.ip().to_string(),
        port: backend.port(),
        path: String::new(),
        protocol: "http".into(),
    };
    config.apm = apm;

    let (reporter, events) = ChannelReporter::new();
    let plugin = Arc::new(TracingPlugin::start(config.apm.clone(), Arc::new(reporter)).unwrap());
    let shutdown = Shutdown::new();

    let log_records = if config.apm.active {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ReconstructionWorker::new(plugin.reconstructor().unwrap(), rx);
        tokio::spawn(worker.run(shutdown.subscribe()));
        Some(tx)
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config, plugin.clone(), log_records);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestGateway {
        addr,
        plugin,
        events,
        shutdown,
    }
}

/// Split a traceparent into (trace id, span id, flags).
pub fn split_traceparent(value: &str) -> (String, String, String) {
    let parts: Vec<&str> = value.split('-').collect();
    assert_eq!(parts.len(), 4, "malformed traceparent {value}");
    (parts[1].into(), parts[2].into(), parts[3].into())
}
