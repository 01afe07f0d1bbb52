//! Request pipeline: the resilient API client
//!
//! ## Table of Contents
//! - **RequestOptions**: Per-call method, body, headers, and overrides
//! - **ApiClient**: Composes credentials, circuit breaking, and retry
//!
//! Every call flows: resolve identity headers -> circuit breaker check ->
//! retried, timed transport call -> classify or parse. Callers receive
//! parsed JSON or exactly one classified error, never a raw response.

use crate::credentials::CredentialResolver;
use crate::error::{ApiError, Result};
use crate::resilience::{BreakerRegistry, CircuitBreakerConfig, RetryConfig, RetryPolicy};
use crate::transport::{HttpTransport, Method, TransportRequest};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Options for a single pipeline request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// HTTP method (GET when unset)
    pub method: Option<Method>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Extra headers merged over the resolved identity headers
    pub headers: HashMap<String, String>,
    /// Retry override for this call
    pub retry: Option<RetryConfig>,
    /// Per-attempt timeout override for this call
    pub timeout: Option<Duration>,
    /// Abort signal for this call
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options for a GET request
    pub fn get() -> Self {
        Self::default()
    }

    /// Options for a POST with a JSON body
    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Some(Method::Post),
            body: Some(body),
            ..Self::default()
        }
    }

    /// Options for a PUT with a JSON body
    pub fn put(body: serde_json::Value) -> Self {
        Self {
            method: Some(Method::Put),
            body: Some(body),
            ..Self::default()
        }
    }

    /// Options for a DELETE request
    pub fn delete() -> Self {
        Self {
            method: Some(Method::Delete),
            ..Self::default()
        }
    }

    /// Set the method explicitly
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override the retry config for this call
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Override the per-attempt timeout for this call
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an abort signal
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Resilient API client over an HTTP transport
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialResolver>,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client from its collaborators
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialResolver>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            credentials,
            breakers: BreakerRegistry::new(breaker),
            retry: RetryPolicy::new(retry),
        }
    }

    /// The credential resolver this client attaches identities with
    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.credentials
    }

    /// The per-endpoint breaker registry
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Execute a request and parse the JSON response.
    ///
    /// The failure path always yields a classified error; transient kinds
    /// were already retried and circuit-broken before it surfaces.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let method = options.method.unwrap_or(Method::Get);
        let key = format!("{} {}", method, endpoint);
        let breaker = self.breakers.get_or_create(&key);
        let mut retry_config = options
            .retry
            .unwrap_or_else(|| self.retry.config().clone());
        if let Some(timeout) = options.timeout {
            retry_config = retry_config.attempt_timeout(timeout);
        }
        let policy = RetryPolicy::new(retry_config);

        let url = self.url(endpoint);
        let transport = self.transport.clone();
        let credentials = self.credentials.clone();
        let extra_headers = options.headers;
        let body = options.body;

        let result = breaker
            .execute(
                endpoint,
                &policy,
                options.cancel.as_ref(),
                |attempt, err| {
                    debug!(endpoint = %endpoint, attempt, kind = %err.kind, "Request attempt failed, will retry");
                },
                move || {
                    let transport = transport.clone();
                    let credentials = credentials.clone();
                    let url = url.clone();
                    let extra_headers = extra_headers.clone();
                    let body = body.clone();
                    async move {
                        let mut headers = credentials.resolve_headers().await;
                        headers.extend(extra_headers);

                        let response = transport
                            .send(TransportRequest {
                                method,
                                url,
                                headers,
                                body,
                            })
                            .await?;

                        if !response.is_success() {
                            return Err(classify_response(response.status, &response.body));
                        }
                        parse_body(&response.body)
                    }
                },
            )
            .await;

        if let Err(err) = &result {
            err.log(endpoint);
        }
        result
    }

    /// GET a JSON resource
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::get()).await
    }

    /// POST a JSON body
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(endpoint, RequestOptions::post(body)).await
    }

    /// PUT a JSON body
    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(endpoint, RequestOptions::put(body)).await
    }

    /// DELETE a resource
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::delete()).await
    }
}

/// Build a classified error from a non-2xx response.
///
/// Error bodies are read best-effort: a JSON `message` or `error` field
/// wins, then the raw text, then a bare status line.
fn classify_response(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| value.get("error").and_then(|m| m.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status));
            ApiError::from_status(status, message).with_details(value)
        }
        Err(_) => {
            let trimmed = body.trim();
            let message = if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                trimmed.to_string()
            };
            ApiError::from_status(status, message)
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    // Empty 2xx bodies (204 and friends) parse as JSON null.
    let text = if body.trim().is_empty() { "null" } else { body };
    Ok(serde_json::from_str(text)?)
}
