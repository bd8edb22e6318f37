//! Access-log record of one finished request.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::gateway::service::join_url;
use crate::gateway::{Exchange, Headers, ServiceDescriptor};

/// Snapshot of a completed request, as written by the gateway's log serializer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogRecord {
    /// Request start, milliseconds since the Unix epoch.
    pub started_at: u64,

    #[serde(default)]
    pub latencies: Latencies,

    pub request: RequestRecord,

    pub response: ResponseRecord,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

/// Latency breakdown in milliseconds. Negative values (logged when a phase
/// never ran) read as zero.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Latencies {
    /// End to end, as seen by the client.
    pub request: i64,
    /// Spent inside the gateway itself.
    #[serde(rename = "kong")]
    pub gateway: i64,
    /// Spent waiting on the upstream.
    pub proxy: i64,
}

impl Latencies {
    pub fn request(&self) -> Duration {
        millis(self.request)
    }

    pub fn gateway(&self) -> Duration {
        millis(self.gateway)
    }
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0) as u64)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseRecord {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
}

impl LogRecord {
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn started_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.started_at)
    }

    /// Build the record for an exchange the gateway just finished.
    ///
    /// Request headers are the ones sent upstream, so log-mode stamps are kept.
    pub fn from_exchange(
        exchange: &Exchange,
        started_at: SystemTime,
        request_latency: Duration,
        proxy_latency: Duration,
        status: u16,
        response_headers: Headers,
    ) -> Self {
        let request_ms = request_latency.as_millis() as i64;
        let proxy_ms = proxy_latency.as_millis() as i64;
        let started_at = started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            started_at,
            latencies: Latencies {
                request: request_ms,
                gateway: (request_ms - proxy_ms).max(0),
                proxy: proxy_ms,
            },
            request: RequestRecord {
                method: exchange.method.clone(),
                url: join_url(&exchange.scheme, &exchange.host, exchange.port, &exchange.path),
                headers: exchange.outbound_request_headers(),
            },
            response: ResponseRecord {
                status,
                headers: response_headers,
            },
            service: exchange.service.clone(),
            client_ip: None,
        }
    }
}
