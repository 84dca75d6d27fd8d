//! Environment variable helpers
//!
//! The loader scripts are operator-run, so flags arrive as loosely formatted
//! strings (`ETL_DRY_RUN=yes`, `ETL_BATCH_SIZE= 2000`). These helpers accept
//! the common spellings and fall back to a default instead of aborting.

use crate::error::{OlistError, Result};
use std::str::FromStr;

/// Interpret a flag value.
///
/// `1/true/yes/on` is true, `0/false/no/off` is false. Empty or unrecognised
/// values yield `None`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean flag from the environment, returning `default` when unset,
/// empty or unrecognised.
pub fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Read and parse an optional value from the environment.
///
/// Unset or blank variables are `Ok(None)`; a value that does not parse is an
/// error so that a typo in e.g. `ETL_BATCH_SIZE` is not silently ignored.
pub fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OlistError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
        _ => Ok(None),
    }
}
