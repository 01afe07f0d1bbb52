//! Retry execution with exponential backoff
//!
//! ## Table of Contents
//! - **RetryConfig**: Attempt count, delays, and per-attempt timeout
//! - **Backoff**: Exponential delay calculator with bounded jitter
//! - **RetryPolicy**: Runs async operations under timeout and retry
//!
//! Only classified-retryable errors (network, timeout, rate-limit, server)
//! are retried; everything else surfaces on the first occurrence.

use crate::error::{ApiError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (first call included)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the exponential delay growth
    pub max_delay: Duration,
    /// Upper bound on the random jitter added to each delay
    pub jitter_max: Duration,
    /// Timeout applied to each attempt individually
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_max: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total attempt count
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter upper bound
    pub fn jitter_max(mut self, jitter: Duration) -> Self {
        self.jitter_max = jitter;
        self
    }

    /// Set the per-attempt timeout
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff from a retry config
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Expected delay for a 1-based attempt number, without jitter.
    ///
    /// `min(base_delay * 2^(attempt-1), max_delay)`, non-decreasing in
    /// the attempt number.
    pub fn expected_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay for a 1-based attempt number, jitter included.
    ///
    /// Bounded above by `max_delay + jitter_max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.config.jitter_max.as_millis() as f64 * rand_jitter();
        self.expected_delay(attempt) + Duration::from_millis(jitter_ms as u64)
    }

    /// Get the next delay, or None once the attempt budget is spent.
    ///
    /// One delay separates each pair of attempts, so a budget of N
    /// attempts yields N-1 delays.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt))
    }

    /// Reset the backoff
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0)
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry policy for executing operations with timeout and backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default config
    pub fn default_config() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Access the underlying config
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with per-attempt timeout and retries.
    ///
    /// `on_retry` fires once per scheduled retry, before the backoff sleep.
    /// A fired cancellation token rejects the in-flight attempt and any
    /// pending backoff immediately.
    pub async fn run<F, Fut, T, C>(
        &self,
        endpoint: &str,
        cancel: Option<&CancellationToken>,
        mut on_retry: C,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnMut(u32, &ApiError),
    {
        let mut backoff = Backoff::new(self.config.clone());

        for attempt in 1..=self.config.max_attempts {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(ApiError::timeout(format!("{} cancelled", endpoint)));
                }
            }

            let result = self.attempt_once(endpoint, cancel, operation()).await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt < self.config.max_attempts && err.is_retryable() {
                        on_retry(attempt, &err);
                        let delay = backoff
                            .next_delay()
                            .unwrap_or(self.config.base_delay);
                        debug!(
                            endpoint = %endpoint,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            kind = %err.kind,
                            "Retrying after failure"
                        );
                        self.backoff_sleep(endpoint, cancel, delay).await?;
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        // Loop always returns inside; max_attempts is >= 1.
        Err(ApiError::unknown(format!("{} exhausted retries", endpoint)))
    }

    async fn attempt_once<Fut, T>(
        &self,
        endpoint: &str,
        cancel: Option<&CancellationToken>,
        fut: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let timed = tokio::time::timeout(self.config.attempt_timeout, fut);
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(ApiError::timeout(format!("{} cancelled", endpoint))),
                res = timed => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(ApiError::timeout(format!(
                        "{} timed out after {}ms",
                        endpoint,
                        self.config.attempt_timeout.as_millis()
                    ))),
                },
            },
            None => match timed.await {
                Ok(inner) => inner,
                Err(_) => Err(ApiError::timeout(format!(
                    "{} timed out after {}ms",
                    endpoint,
                    self.config.attempt_timeout.as_millis()
                ))),
            },
        }
    }

    async fn backoff_sleep(
        &self,
        endpoint: &str,
        cancel: Option<&CancellationToken>,
        delay: Duration,
    ) -> Result<()> {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => {
                    Err(ApiError::timeout(format!("{} cancelled during backoff", endpoint)))
                }
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
