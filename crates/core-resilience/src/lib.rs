//! Bulwark Core Resilience: keyed circuit breaker
//!
//! # Overview
//!
//! This crate gates calls to unhealthy dependencies. One [`CircuitBreaker`]
//! instance tracks an independent circuit per key, fails fast while a circuit
//! is open, bounds every call with a timeout, and reports state changes to an
//! optional [`MetricsSink`].
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - What the wrapped operation does (cache, database, HTTP)
//! - How metrics are exported
//! - Retry policy, which callers layer on top of [`CircuitBreaker::execute`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Caller (cache layer, db layer, ...)   │
//! └─────────────┬───────────────────────────┘
//!               │ key + operation
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast per key
//! │  (entry check, timeout race, counters)  │
//! └──────┬──────────────────────┬───────────┘
//!        │                      │ transitions, outcomes
//!        ▼                      ▼
//!  External Service       MetricsSink (optional)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use bulwark_core_resilience::{
//!     BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), BreakerError<std::io::Error>> {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(10),
//!     reset_timeout: Duration::from_secs(60),
//!     success_threshold: 1,
//! });
//!
//! // Tighter timeout for cache reads only
//! let fast = CircuitBreakerOverrides::default().with_timeout(Duration::from_millis(200));
//! let hit = breaker
//!     .execute_with("cache:get", &fast, || async { Ok::<_, std::io::Error>(Some(42)) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod metrics;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitState, CircuitStats,
};
pub use error::BreakerError;
pub use metrics::{MetricsSink, NoopMetrics};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use bulwark_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitState,
    };
    pub use super::error::BreakerError;
    pub use super::metrics::MetricsSink;
}
