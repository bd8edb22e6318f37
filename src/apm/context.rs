//! Context attached to transactions and spans before they end.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use url::Url;

use crate::gateway::Headers;

/// The HTTP request a transaction or span describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpRequestContext {
    pub method: String,
    pub url: String,
    pub host: String,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl HttpRequestContext {
    pub fn new(method: impl Into<String>, url: &str, host: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: normalize_url(url),
            host: host.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// The HTTP response a transaction or span describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpResponseContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

/// Where an exit span went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Destination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// `host:port` of the destination service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_resource: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

impl Outcome {
    /// Server-side outcome: only 5xx is a failure of this hop.
    pub fn for_transaction(status: Option<u16>) -> Self {
        match status {
            Some(code) if code >= 500 => Outcome::Failure,
            Some(_) => Outcome::Success,
            None => Outcome::Unknown,
        }
    }

    /// Client-side outcome: any 4xx or 5xx from the upstream is a failure.
    pub fn for_span(status: Option<u16>) -> Self {
        match status {
            Some(code) if code >= 400 => Outcome::Failure,
            Some(_) => Outcome::Success,
            None => Outcome::Unknown,
        }
    }
}

/// Canonicalize through `url`; unparseable input is kept verbatim.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

pub(crate) fn epoch_micros(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub(crate) fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
