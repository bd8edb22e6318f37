//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sample rate, TTLs, ports)
//! - Check addresses and header names parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let apm = &config.apm;

    if !(0.0..=1.0).contains(&apm.transaction_sample_rate) {
        errors.push(ValidationError::new(
            "apm.transaction_sample_rate",
            format!("{} is outside [0, 1]", apm.transaction_sample_rate),
        ));
    }
    if apm.active && apm.service_name.trim().is_empty() {
        errors.push(ValidationError::new(
            "apm.service_name",
            "must not be empty when tracing is active",
        ));
    }
    if apm.registry_ttl_secs == 0 {
        errors.push(ValidationError::new("apm.registry_ttl_secs", "must be greater than 0"));
    }
    if apm.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("apm.sweep_interval_secs", "must be greater than 0"));
    }
    if HeaderName::from_bytes(apm.prior_hop_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "apm.prior_hop_header",
            format!("{:?} is not a valid header name", apm.prior_hop_header),
        ));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.service.host.is_empty() {
        errors.push(ValidationError::new("service.host", "must not be empty"));
    }
    if config.service.port == 0 {
        errors.push(ValidationError::new("service.port", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
