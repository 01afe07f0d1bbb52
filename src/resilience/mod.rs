//! Resilience patterns for the request pipeline
//!
//! Provides retry with exponential backoff and per-endpoint circuit breaking.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{Backoff, RetryConfig, RetryPolicy};
