//! Store error taxonomy.
//!
//! DESIGN
//! ======
//! Dispatchers never swallow failures: every transport, status, or decode
//! problem comes back to the caller as a `StoreError`, and the caller decides
//! whether to surface it through the global error field.

/// Errors produced by store dispatchers, transports, storage, and config.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The request never produced a response (network, DNS, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-success HTTP status.
    #[error("server returned status {status}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected envelope shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// Durable key-value storage could not be read or written.
    #[error("storage failed: {0}")]
    Storage(String),

    /// A newer response for the same state slot was already committed.
    #[error("stale {mutation} response dropped")]
    Superseded { mutation: &'static str },
}

impl StoreError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Status { .. } => "E_STATUS",
            Self::Decode(_) => "E_DECODE",
            Self::Storage(_) => "E_STORAGE",
            Self::Superseded { .. } => "E_SUPERSEDED",
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Nothing in the store retries; this is advisory for callers.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { status: 429 | 500..=599, .. })
    }

    /// Human-facing message for the global error field.
    ///
    /// Status errors prefer the backend's `error` field from a JSON body,
    /// falling back to the display text.
    #[must_use]
    pub fn user_message(&self) -> String {
        if let Self::Status { body, .. } = self {
            let backend = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(serde_json::Value::as_str).map(ToOwned::to_owned));
            if let Some(message) = backend {
                return message;
            }
        }
        self.to_string()
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
