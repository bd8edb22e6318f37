//! Upstream service descriptor.

use serde::{Deserialize, Serialize};

/// The upstream service a request is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceDescriptor {
    /// Service identifier for logging.
    pub name: String,

    pub host: String,

    pub port: u16,

    /// Path prefix prepended to the forwarded path; may be empty.
    pub path: String,

    /// Upstream protocol, e.g. `http`, `https`, `grpc`.
    pub protocol: String,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            name: "upstream".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            path: String::new(),
            protocol: "http".to_string(),
        }
    }
}

impl ServiceDescriptor {
    /// Destination resource string, `host:port`.
    pub fn resource(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full URL of the service, `protocol://host:port/path`.
    pub fn url(&self) -> String {
        join_url(&self.protocol, &self.host, self.port, &self.path)
    }
}

/// Join URL parts without doubling or dropping the leading `/` of `path`.
pub fn join_url(scheme: &str, host: &str, port: u16, path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        format!("{scheme}://{host}:{port}{path}")
    } else {
        format!("{scheme}://{host}:{port}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_and_url() {
        let svc = ServiceDescriptor {
            name: "orders".into(),
            host: "orders.internal".into(),
            port: 8080,
            path: "/v1".into(),
            protocol: "http".into(),
        };
        assert_eq!(svc.resource(), "orders.internal:8080");
        assert_eq!(svc.url(), "http://orders.internal:8080/v1");
    }

    #[test]
    fn test_join_url_path_forms() {
        assert_eq!(join_url("https", "h", 443, ""), "https://h:443");
        assert_eq!(join_url("https", "h", 443, "api"), "https://h:443/api");
        assert_eq!(join_url("https", "h", 443, "/api"), "https://h:443/api");
    }
}
