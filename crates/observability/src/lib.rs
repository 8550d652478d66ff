//! Bulwark Observability
//!
//! Exports circuit breaker events to Prometheus. The breaker itself only knows
//! the [`MetricsSink`](bulwark_core_resilience::MetricsSink) trait; this crate
//! supplies the implementation and the text exposition.
//!
//! ## Prometheus Metrics
//!
//! ```
//! use bulwark_observability::PrometheusSink;
//! use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(PrometheusSink::new().unwrap());
//! let breaker = CircuitBreaker::with_metrics(CircuitBreakerConfig::default(), sink.clone());
//!
//! // ... breaker.execute(...) ...
//!
//! let metrics_text = sink.metrics_text().unwrap();
//! ```
//!
//! | Metric | Type | Labels |
//! |---|---|---|
//! | `circuit_breaker_transitions_total` | counter | key, from, to |
//! | `circuit_breaker_successes_total` | counter | key |
//! | `circuit_breaker_failures_total` | counter | key, kind |
//! | `circuit_breaker_opens_total` | counter | key |
//! | `circuit_breaker_rejections_total` | counter | key |
//! | `circuit_breaker_state` | gauge | key |

pub mod metrics;

pub use metrics::{MetricsError, PrometheusSink};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::metrics::tests::has_sample;
    use bulwark_core_resilience::metrics::names;
    use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_breaker_events_reach_prometheus() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let breaker = CircuitBreaker::with_metrics(
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(60),
                ..Default::default()
            },
            sink.clone(),
        );

        breaker
            .execute("cache:get", || async { Ok::<_, String>(()) })
            .await
            .unwrap();
        breaker
            .execute("db:query:User", || async { Err::<(), _>("down".to_string()) })
            .await
            .unwrap_err();
        let rejected = breaker
            .execute("db:query:User", || async { Ok::<_, String>(()) })
            .await
            .unwrap_err();
        assert!(rejected.is_open());

        let output = sink.metrics_text().unwrap();
        let db = [("key", "db:query:User")];
        assert!(has_sample(&output, names::SUCCESSES_TOTAL, &[("key", "cache:get")], "1"));
        assert!(has_sample(
            &output,
            names::FAILURES_TOTAL,
            &[("key", "db:query:User"), ("kind", "error")],
            "1"
        ));
        assert!(has_sample(&output, names::OPENS_TOTAL, &db, "1"));
        assert!(has_sample(&output, names::REJECTIONS_TOTAL, &db, "1"));
        assert!(has_sample(&output, names::STATE, &db, "2"));
        assert!(has_sample(&output, names::STATE, &[("key", "cache:get")], "0"));
    }
}
