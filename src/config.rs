//! Store configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::StoreError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_STORAGE_PATH: &str = ".blogstore/storage.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Behavior switches for the store itself (independent of transport).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Drop responses older than the last one committed to the same state slot.
    pub fence_stale_responses: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub storage_path: PathBuf,
    pub timeouts: HttpTimeouts,
    pub options: StoreOptions,
}

impl StoreConfig {
    /// Build typed store config from environment variables.
    ///
    /// Optional:
    /// - `BLOGSTORE_BASE_URL`: default `http://127.0.0.1:3000/api`
    /// - `BLOGSTORE_STORAGE_PATH`: default `.blogstore/storage.json`
    /// - `BLOGSTORE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `BLOGSTORE_CONNECT_TIMEOUT_SECS`: default 10
    /// - `BLOGSTORE_FENCE_STALE`: `true` or `false` (default)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigParse`] for an unrecognized fence flag.
    pub fn from_env() -> Result<Self, StoreError> {
        let base_url = normalize_base_url(&std::env::var("BLOGSTORE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()));
        let storage_path =
            PathBuf::from(std::env::var("BLOGSTORE_STORAGE_PATH").unwrap_or_else(|_| DEFAULT_STORAGE_PATH.to_owned()));
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64("BLOGSTORE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("BLOGSTORE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let fence_stale_responses = parse_bool_flag(std::env::var("BLOGSTORE_FENCE_STALE").ok().as_deref())?;

        Ok(Self { base_url, storage_path, timeouts, options: StoreOptions { fence_stale_responses } })
    }
}

/// Trim whitespace and any trailing `/` so paths can be appended directly.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_bool_flag(raw: Option<&str>) -> Result<bool, StoreError> {
    match raw.map(str::trim).unwrap_or("false") {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(StoreError::ConfigParse(format!(
            "unsupported BLOGSTORE_FENCE_STALE '{other}' (expected 'true' or 'false')"
        ))),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
