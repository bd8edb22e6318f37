//! Logged-and-defaulted accessor reads.
//!
//! Mirrors how the phases treat the host: a failed read is an `error` log
//! line and an empty value, successful reads are traced at `debug`.

use std::fmt::Debug;

use crate::gateway::context::AccessorError;

/// Unwrap an accessor result, logging failures and falling back to `T::default()`.
pub fn ask<T: Default + Debug>(accessor: &'static str, result: Result<T, AccessorError>) -> T {
    match result {
        Ok(value) => {
            tracing::debug!(accessor, value = ?value, "Accessor read");
            value
        }
        Err(e) => {
            tracing::error!(accessor, error = %e, "Cannot read accessor");
            T::default()
        }
    }
}
