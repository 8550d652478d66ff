/*!
 * Bulwark - keyed circuit breaking for calls to unhealthy dependencies
 *
 * The breaker itself lives in `bulwark-core-resilience` and the Prometheus
 * export in `bulwark-observability`. This crate ties them together with:
 * - TOML configuration with per-key breaker overrides
 * - Structured logging setup
 * - A breaker-guarded cache service
 * - Scripted simulation for trying out thresholds
 */

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod simulate;

// Re-export commonly used types
pub use bulwark_core_resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitState,
    CircuitStats, MetricsSink, NoopMetrics,
};
pub use bulwark_observability::PrometheusSink;
pub use cache::{CacheService, CacheStore, CacheStoreError, MemoryStore};
pub use config::{load_config, BreakerSettings, BulwarkConfig, CacheSettings, LoggingConfig};
pub use error::{BulwarkError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
