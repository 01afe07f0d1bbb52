//! Circuit breaker for unhealthy endpoints
//!
//! ## Table of Contents
//! - **CircuitState**: closed / open / half-open
//! - **CircuitBreakerConfig**: Thresholds and cooldown
//! - **CircuitBreaker**: Per-endpoint state machine wrapping the retry policy
//! - **BreakerRegistry**: Lazily-created breaker per method+endpoint key
//!
//! While open, calls are rejected with a CIRCUIT_OPEN error before any
//! network attempt; this is the backpressure protecting a degraded backend.

use crate::error::{ApiError, ErrorKind, Result};
use crate::resilience::retry::RetryPolicy;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Requests flow normally
    Closed = 0,
    /// Requests are rejected without being attempted
    Open = 1,
    /// A limited number of probe requests test recovery
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Successes in half-open required to close the circuit
    pub success_threshold: u32,
    /// Time the circuit stays open before probing
    pub cooldown: Duration,
    /// Maximum probe requests admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(60),
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the success threshold for half-open recovery
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the open-state cooldown
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the half-open probe limit
    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = max.max(1);
        self
    }
}

/// Per-endpoint circuit breaker
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    half_open_requests: AtomicU64,
    last_failure: RwLock<Option<Instant>>,
    opened_at: RwLock<Option<Instant>>,
    key: String,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for an endpoint key
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            half_open_requests: AtomicU64::new(0),
            last_failure: RwLock::new(None),
            opened_at: RwLock::new(None),
            key: key.into(),
        }
    }

    /// Create with default config
    pub fn with_defaults(key: impl Into<String>) -> Self {
        Self::new(key, CircuitBreakerConfig::default())
    }

    /// Get current state, applying the open-to-half-open transition
    pub fn state(&self) -> CircuitState {
        self.check_cooldown();
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Check whether a request may proceed
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let admitted = self.half_open_requests.fetch_add(1, Ordering::SeqCst);
                admitted < self.config.half_open_max_requests as u64
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold as u64 {
                    self.close();
                } else {
                    // Hand the probe slot back; closing can take more
                    // successes than the admission cap allows at once.
                    let _ = self
                        .half_open_requests
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        *self.last_failure.write() = Some(Instant::now());

        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold as u64 {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens the circuit
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation behind the breaker, with retries.
    ///
    /// In half-open state probe calls get a single attempt regardless of
    /// the retry policy, so a recovering backend is not hammered. The
    /// whole retried call counts as one success or failure.
    pub async fn execute<F, Fut, T, C>(
        &self,
        endpoint: &str,
        retry: &RetryPolicy,
        cancel: Option<&CancellationToken>,
        on_retry: C,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnMut(u32, &ApiError),
    {
        if !self.allow_request() {
            debug!(key = %self.key, "Request rejected by open circuit");
            return Err(ApiError::circuit_open(&self.key));
        }

        let probing = CircuitState::from(self.state.load(Ordering::SeqCst)) == CircuitState::HalfOpen;
        let result = if probing {
            let probe = RetryPolicy::new(retry.config().clone().max_attempts(1));
            probe.run(endpoint, cancel, on_retry, operation).await
        } else {
            retry.run(endpoint, cancel, on_retry, operation).await
        };

        match &result {
            Ok(_) => self.record_success(),
            Err(err) if err.kind == ErrorKind::CircuitOpen => {}
            Err(_) => self.record_failure(),
        }

        result
    }

    /// Force the circuit open
    pub fn open(&self) {
        let prev = self.state.swap(CircuitState::Open as u8, Ordering::SeqCst);
        if prev != CircuitState::Open as u8 {
            *self.opened_at.write() = Some(Instant::now());
            self.half_open_requests.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
            warn!(key = %self.key, "Circuit breaker opened");
        }
    }

    /// Force the circuit closed
    pub fn close(&self) {
        let prev = self.state.swap(CircuitState::Closed as u8, Ordering::SeqCst);
        if prev != CircuitState::Closed as u8 {
            self.failure_count.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
            *self.opened_at.write() = None;
            info!(key = %self.key, "Circuit breaker closed");
        }
    }

    fn half_open(&self) {
        let prev = self.state.swap(CircuitState::HalfOpen as u8, Ordering::SeqCst);
        if prev != CircuitState::HalfOpen as u8 {
            self.failure_count.store(0, Ordering::SeqCst);
            self.half_open_requests.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
            debug!(key = %self.key, "Circuit breaker half-open");
        }
    }

    fn check_cooldown(&self) {
        if self.state.load(Ordering::SeqCst) == CircuitState::Open as u8 {
            if let Some(opened_at) = *self.opened_at.read() {
                if opened_at.elapsed() >= self.config.cooldown {
                    self.half_open();
                }
            }
        }
    }

    /// Get the current failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Get the endpoint key this breaker guards
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reset to a fresh closed breaker
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.half_open_requests.store(0, Ordering::SeqCst);
        *self.last_failure.write() = None;
        *self.opened_at.write() = None;
        info!(key = %self.key, "Circuit breaker reset");
    }
}

/// Process-wide registry of per-endpoint breakers.
///
/// Breakers are created lazily on first use and live for the process
/// lifetime; nothing outside the breaker mutates its state.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    /// Create a registry applying one config to every breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or lazily create the breaker for a method+endpoint key
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone()
    }

    /// Number of endpoints tracked so far
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether any breakers exist yet
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshot of endpoint keys currently open
    pub fn open_endpoints(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
