//! Metrics sink seam for breaker events
//!
//! The breaker reports counters and a per-key state gauge through the
//! [`MetricsSink`] trait. Implementations must be infallible from the breaker's
//! point of view: the breaker never inspects a result and recovers from a
//! panicking sink.

/// Metric family names emitted by the circuit breaker
pub mod names {
    /// Counter, labels: key, from, to
    pub const TRANSITIONS_TOTAL: &str = "circuit_breaker_transitions_total";
    /// Counter, labels: key
    pub const SUCCESSES_TOTAL: &str = "circuit_breaker_successes_total";
    /// Counter, labels: key, kind (error | timeout)
    pub const FAILURES_TOTAL: &str = "circuit_breaker_failures_total";
    /// Counter, labels: key
    pub const OPENS_TOTAL: &str = "circuit_breaker_opens_total";
    /// Counter, labels: key
    pub const REJECTIONS_TOTAL: &str = "circuit_breaker_rejections_total";
    /// Gauge, labels: key. 0 = closed, 1 = half-open, 2 = open
    pub const STATE: &str = "circuit_breaker_state";
}

/// Receiver for breaker counters and gauges
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Set a gauge to an absolute value
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that discards everything. Used when no sink is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn set_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}
