//! In-memory [`GatewayContext`] for one request/response exchange.
//!
//! The host fills it in as the request progresses: request data before the
//! access phase, upstream response data before the response phase.

use std::collections::HashMap;

use crate::gateway::context::{AccessorError, GatewayContext};
use crate::gateway::headers::Headers;
use crate::gateway::service::ServiceDescriptor;

#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub request_headers: Headers,
    pub service: Option<ServiceDescriptor>,
    service_status: Option<u16>,
    service_response_headers: Headers,
    response_headers: Option<Headers>,
    shared: HashMap<String, String>,
    upstream_headers: Headers,
}

impl Exchange {
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        request_headers: Headers,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
            request_headers,
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.service = Some(service);
        self
    }

    /// Record what the upstream service returned.
    pub fn record_service_response(&mut self, status: u16, headers: Headers) {
        self.service_status = Some(status);
        self.service_response_headers = headers;
    }

    /// Record the headers going back to the client.
    pub fn record_response_headers(&mut self, headers: Headers) {
        self.response_headers = Some(headers);
    }

    /// Headers the phases set for the upstream request.
    pub fn upstream_headers(&self) -> &Headers {
        &self.upstream_headers
    }

    /// Inbound request headers with the phases' upstream headers applied.
    pub fn outbound_request_headers(&self) -> Headers {
        let mut headers = self.request_headers.clone();
        for (name, values) in self.upstream_headers.iter() {
            let mut values = values.iter();
            if let Some(first) = values.next() {
                headers.set(name, first.clone());
            }
            for value in values {
                headers.append(name, value.clone());
            }
        }
        headers
    }
}

impl GatewayContext for Exchange {
    fn request_method(&self) -> Result<String, AccessorError> {
        Ok(self.method.clone())
    }

    fn forwarded_scheme(&self) -> Result<String, AccessorError> {
        Ok(self.scheme.clone())
    }

    fn forwarded_host(&self) -> Result<String, AccessorError> {
        Ok(self.host.clone())
    }

    fn forwarded_port(&self) -> Result<u16, AccessorError> {
        Ok(self.port)
    }

    fn forwarded_path(&self) -> Result<String, AccessorError> {
        Ok(self.path.clone())
    }

    fn request_headers(&self) -> Result<Headers, AccessorError> {
        Ok(self.request_headers.clone())
    }

    fn service(&self) -> Result<ServiceDescriptor, AccessorError> {
        self.service
            .clone()
            .ok_or(AccessorError::Unavailable("service"))
    }

    fn service_response_status(&self) -> Result<u16, AccessorError> {
        self.service_status
            .ok_or(AccessorError::Unavailable("service response status"))
    }

    fn service_response_headers(&self) -> Result<Headers, AccessorError> {
        Ok(self.service_response_headers.clone())
    }

    fn response_headers(&self) -> Result<Headers, AccessorError> {
        self.response_headers
            .clone()
            .ok_or(AccessorError::Unavailable("response headers"))
    }

    fn set_shared(&mut self, key: &str, value: String) -> Result<(), AccessorError> {
        self.shared.insert(key.to_string(), value);
        Ok(())
    }

    fn get_shared(&self, key: &str) -> Result<String, AccessorError> {
        self.shared
            .get(key)
            .cloned()
            .ok_or_else(|| AccessorError::MissingShared(key.to_string()))
    }

    fn set_upstream_header(&mut self, name: &str, value: &str) -> Result<(), AccessorError> {
        self.upstream_headers.set(name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_headers_override_inbound() {
        let mut inbound = Headers::new();
        inbound.append("traceparent", "old");
        inbound.append("accept", "*/*");
        let mut exchange = Exchange::new("GET", "http", "gw", 80, "/", inbound);
        exchange.set_upstream_header("traceparent", "new").unwrap();

        let outbound = exchange.outbound_request_headers();
        assert_eq!(outbound.get_all("traceparent"), ["new"]);
        assert_eq!(outbound.first("accept"), Some("*/*"));
    }

    #[test]
    fn test_shared_slot_and_missing_values() {
        let mut exchange = Exchange::default();
        assert!(exchange.get_shared("k").is_err());
        exchange.set_shared("k", "v".into()).unwrap();
        assert_eq!(exchange.get_shared("k").unwrap(), "v");
        assert!(exchange.service().is_err());
        assert!(exchange.service_response_status().is_err());
    }
}
