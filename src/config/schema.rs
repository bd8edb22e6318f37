//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! and its APM plugin. All types derive Serde traits for deserialization
//! from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gateway::ServiceDescriptor;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream service every request is forwarded to.
    pub service: ServiceDescriptor,

    /// APM plugin settings.
    pub apm: ApmConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// How a request's transaction and span are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TracingMode {
    /// Live correlation: access phase opens, response phase closes.
    #[default]
    Sync,
    /// Post-hoc reconstruction from the access-log record.
    Log,
}

/// APM plugin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApmConfig {
    /// Master switch; when false every phase is a no-op.
    pub active: bool,

    pub mode: TracingMode,

    /// Service name reported with every event.
    pub service_name: String,

    pub service_version: Option<String>,

    pub environment: Option<String>,

    pub service_node_name: Option<String>,

    /// APM server the reporter would ship to.
    pub server_url: String,

    /// Probability that a new trace is sampled (0.0 - 1.0).
    pub transaction_sample_rate: f64,

    /// When false, everything is recorded as unsampled.
    pub recording: bool,

    /// Attach request/response headers to transaction context.
    pub capture_headers: bool,

    /// Age after which an unfinished transaction is evicted from the registry.
    pub registry_ttl_secs: u64,

    /// How often the registry is swept.
    pub sweep_interval_secs: u64,

    /// Header carrying the caller's `traceparent` in log mode.
    pub prior_hop_header: String,

    /// Labels added to every transaction.
    pub global_labels: BTreeMap<String, String>,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            active: false,
            mode: TracingMode::Sync,
            service_name: "api-gateway".to_string(),
            service_version: None,
            environment: None,
            service_node_name: None,
            server_url: "http://localhost:8200".to_string(),
            transaction_sample_rate: 1.0,
            recording: true,
            capture_headers: true,
            registry_ttl_secs: 300,
            sweep_interval_secs: 30,
            prior_hop_header: "x-gateway-prior-traceparent".to_string(),
            global_labels: BTreeMap::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
