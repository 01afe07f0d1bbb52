//! Builder for assembling the game service
//!
//! ## Table of Contents
//! - **ClientConfig**: Complete configuration struct
//! - **GamedeckBuilder**: Builder pattern wiring every collaborator
//!
//! Construction happens once at process start; everything the pipeline
//! needs (transport, credential provider, store) is injected here
//! instead of living in module-level globals.

use crate::client::ApiClient;
use crate::credentials::{AnonymousProvider, CredentialProvider, CredentialResolver};
use crate::error::{ApiError, Result};
use crate::interactions::LocalInteractionStore;
use crate::queue::OfflineQueue;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::service::GameService;
use crate::store::{BoxedKeyValueStore, FileStore, MemoryStore};
use crate::transport::{HttpTransport, ReqwestTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable for the API base URL
pub const API_URL_ENV: &str = "GAMEDECK_API";

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL; falls back to the `GAMEDECK_API` env var
    pub base_url: Option<String>,
    /// Transport-level timeout backstop
    pub request_timeout: Duration,
    /// Default retry behavior for every request
    pub retry: RetryConfig,
    /// Circuit breaker settings applied per endpoint
    pub breaker: CircuitBreakerConfig,
    /// Replay budget per queued write
    pub max_replays: u32,
    /// Cap on the local play-session log
    pub session_cap: usize,
    /// Start in guest mode
    pub guest_mode: bool,
    /// File path for persistent local storage
    pub store_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            max_replays: 3,
            session_cap: 200,
            guest_mode: true,
            store_path: None,
        }
    }
}

/// Builder for the game service and its request pipeline
pub struct GamedeckBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    provider: Option<Arc<dyn CredentialProvider>>,
    store: Option<BoxedKeyValueStore>,
}

impl GamedeckBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            provider: None,
            store: None,
        }
    }

    /// Set the API base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the transport-level timeout backstop
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the default retry config
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the circuit breaker config
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// Set the replay budget for queued writes
    pub fn with_max_replays(mut self, max_replays: u32) -> Self {
        self.config.max_replays = max_replays;
        self
    }

    /// Set the play-session log cap
    pub fn with_session_cap(mut self, cap: usize) -> Self {
        self.config.session_cap = cap;
        self
    }

    /// Set the initial guest-mode flag
    pub fn with_guest_mode(mut self, enabled: bool) -> Self {
        self.config.guest_mode = enabled;
        self
    }

    /// Set a file path for persistent local storage
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// Inject a custom HTTP transport
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Inject the credential provider
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Inject a custom storage backend
    pub fn with_store(mut self, store: BoxedKeyValueStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the game service
    pub fn build(self) -> Result<GameService> {
        let base_url = self
            .config
            .base_url
            .or_else(|| std::env::var(API_URL_ENV).ok())
            .ok_or_else(|| {
                ApiError::validation(format!(
                    "API base URL not configured: set {} or use with_base_url",
                    API_URL_ENV
                ))
            })?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(self.config.request_timeout)?),
        };

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(AnonymousProvider));

        let store: BoxedKeyValueStore = match self.store {
            Some(s) => s,
            None => match &self.config.store_path {
                Some(path) => Arc::new(FileStore::open(path)?) as BoxedKeyValueStore,
                None => Arc::new(MemoryStore::new()) as BoxedKeyValueStore,
            },
        };

        info!(
            base_url = %base_url,
            guest_mode = self.config.guest_mode,
            store = %store.name(),
            "Building game service"
        );

        let credentials = Arc::new(CredentialResolver::new(provider, self.config.guest_mode));
        let client = Arc::new(ApiClient::new(
            base_url,
            transport,
            credentials,
            self.config.retry,
            self.config.breaker,
        ));
        let local = LocalInteractionStore::new(store.clone(), self.config.session_cap);
        let queue = OfflineQueue::new(store, self.config.max_replays);

        Ok(GameService::new(client, local, queue))
    }
}

impl Default for GamedeckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_with_base_url() {
        let service = GamedeckBuilder::new()
            .with_base_url("https://api.example.com")
            .build();
        assert!(service.is_ok());
        assert!(service.unwrap().is_in_guest_mode());
    }

    #[test]
    fn test_builder_requires_base_url() {
        // No env var in tests, so the builder must refuse.
        std::env::remove_var(API_URL_ENV);
        let result = GamedeckBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let service = GamedeckBuilder::new()
            .with_base_url("https://api.example.com")
            .with_store_path(dir.path().join("state.json"))
            .with_guest_mode(false)
            .build()
            .unwrap();
        assert!(!service.is_in_guest_mode());
    }

    #[test]
    fn test_builder_with_tuned_resilience() {
        let service = GamedeckBuilder::new()
            .with_base_url("https://api.example.com")
            .with_retry(RetryConfig::default().max_attempts(5))
            .with_circuit_breaker(CircuitBreakerConfig::default().failure_threshold(10))
            .with_max_replays(5)
            .build();
        assert!(service.is_ok());
    }
}
