//! HTTP transport seam between the store and the backend.
//!
//! DESIGN
//! ======
//! The store talks to a `Transport` trait object so tests can swap in a
//! scripted mock. Credentials travel on each `ApiRequest` instead of living
//! in client-wide default headers: the store reads the current token at call
//! time, so login/logout never mutate the HTTP client.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::config::{HttpTimeouts, normalize_base_url};
use crate::error::StoreError;

// =============================================================================
// REQUEST
// =============================================================================

/// One outgoing API call. Paths are relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Bearer token attached as `Authorization`, if any.
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// A `GET` with no body, the default request shape.
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), body: None, bearer: None }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: Method::POST, path: path.into(), body: Some(body), bearer: None }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self { method: Method::PATCH, path: path.into(), body: Some(body), bearer: None }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self { method: Method::DELETE, path: path.into(), body: None, bearer: None }
    }

    /// Attach `token` as the bearer credential. An empty token attaches nothing.
    #[must_use]
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = (!token.is_empty()).then(|| token.to_owned());
        self
    }
}

// =============================================================================
// TRANSPORT TRAIT
// =============================================================================

/// Executes API requests and returns the raw JSON body. Enables mocking in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] when no response arrives,
    /// [`StoreError::Status`] for non-2xx responses, and
    /// [`StoreError::Decode`] when the body is not JSON.
    async fn send(&self, request: ApiRequest) -> Result<Value, StoreError>;
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

/// `reqwest`-backed transport against a fixed base URL.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `base_url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| StoreError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: normalize_base_url(base_url) })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, StoreError> {
        let url = self.url_for(&request.path);
        let mut builder = self.http.request(request.method, &url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(StoreError::Status { status: status.as_u16(), body: text });
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
