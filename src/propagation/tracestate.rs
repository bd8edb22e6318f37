//! W3C `tracestate` codec.
//!
//! Vendor-specific state travelling alongside `traceparent`:
//! `vendor1=value1,vendor2=value2`. The gateway never interprets the
//! members, it only validates and forwards them.

use std::fmt;

use crate::propagation::error::PropagationError;

/// Header carrying vendor-specific trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";

const MAX_MEMBERS: usize = 32;
const MAX_KEY_LEN: usize = 256;
const MAX_VALUE_LEN: usize = 256;

/// Ordered list of `key=value` members, most recent vendor first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceState {
    members: Vec<(String, String)>,
}

impl TraceState {
    /// Parse one or more `tracestate` header values.
    ///
    /// Multiple header lines are concatenated in order, as if joined by `,`.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, PropagationError> {
        let mut members: Vec<(String, String)> = Vec::new();

        for value in values {
            for member in value.as_ref().split(',') {
                let member = member.trim();
                if member.is_empty() {
                    continue;
                }

                let (key, val) = member.split_once('=').ok_or_else(|| {
                    PropagationError::TraceState(format!("member {member:?} has no '='"))
                })?;
                if !valid_key(key) {
                    return Err(PropagationError::TraceState(format!("invalid key {key:?}")));
                }
                if !valid_value(val) {
                    return Err(PropagationError::TraceState(format!(
                        "invalid value for key {key:?}"
                    )));
                }
                if members.iter().any(|(k, _)| k == key) {
                    return Err(PropagationError::TraceState(format!("duplicate key {key:?}")));
                }

                members.push((key.to_string(), val.to_string()));
            }
        }

        if members.len() > MAX_MEMBERS {
            return Err(PropagationError::TraceState(format!(
                "{} members exceeds limit of {}",
                members.len(),
                MAX_MEMBERS
            )));
        }

        Ok(Self { members })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

// key = simple-key / tenant-id "@" system-id
fn valid_key(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return false;
    }

    let (tenant, system) = match key.split_once('@') {
        Some((tenant, system)) => (tenant, Some(system)),
        None => (key, None),
    };

    let key_char = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '*' | '/')
    };

    let tenant_ok = match tenant.chars().next() {
        Some(first) if system.is_some() => {
            (first.is_ascii_lowercase() || first.is_ascii_digit()) && tenant.chars().all(key_char)
        }
        Some(first) => first.is_ascii_lowercase() && tenant.chars().all(key_char),
        None => false,
    };

    let system_ok = match system {
        Some(system) => {
            !system.is_empty()
                && system.len() <= 14
                && system.starts_with(|c: char| c.is_ascii_lowercase())
                && system.chars().all(key_char)
        }
        None => true,
    };

    tenant_ok && system_ok
}

// printable ASCII except ',' and '=', no trailing space
fn valid_value(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_VALUE_LEN
        && !value.ends_with(' ')
        && value
            .bytes()
            .all(|b| (0x20..=0x7e).contains(&b) && b != b',' && b != b'=')
}
