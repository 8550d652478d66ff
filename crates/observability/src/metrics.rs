//! Prometheus metrics derived from circuit breaker events
//!
//! [`PrometheusSink`] implements the breaker's [`MetricsSink`] seam on top of a
//! `prometheus::Registry` owned by the sink. Label values are matched to each
//! family's label names, so callers may pass labels in any order.

use bulwark_core_resilience::metrics::{names, MetricsSink};
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use thiserror::Error;

/// Errors raised while building or rendering the metrics registry
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

const KEY: &[&str] = &["key"];
const KEY_KIND: &[&str] = &["key", "kind"];
const KEY_FROM_TO: &[&str] = &["key", "from", "to"];

/// Metrics sink exporting breaker events in Prometheus format
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    transitions: IntCounterVec,
    successes: IntCounterVec,
    failures: IntCounterVec,
    opens: IntCounterVec,
    rejections: IntCounterVec,
    state: GaugeVec,
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink").finish_non_exhaustive()
    }
}

impl PrometheusSink {
    /// Create a sink with its own registry
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create a sink registering its families in an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let transitions = counter(
            &registry,
            names::TRANSITIONS_TOTAL,
            "Circuit state transitions",
            KEY_FROM_TO,
        )?;
        let successes = counter(
            &registry,
            names::SUCCESSES_TOTAL,
            "Operations that completed successfully",
            KEY,
        )?;
        let failures = counter(
            &registry,
            names::FAILURES_TOTAL,
            "Operations that failed or timed out",
            KEY_KIND,
        )?;
        let opens = counter(
            &registry,
            names::OPENS_TOTAL,
            "Times a circuit opened",
            KEY,
        )?;
        let rejections = counter(
            &registry,
            names::REJECTIONS_TOTAL,
            "Calls rejected without invoking the operation",
            KEY,
        )?;

        let state = GaugeVec::new(
            Opts::new(names::STATE, "Circuit state (0=closed, 1=half_open, 2=open)"),
            KEY,
        )?;
        registry.register(Box::new(state.clone()))?;

        Ok(Self {
            registry,
            transitions,
            successes,
            failures,
            opens,
            rejections,
            state,
        })
    }

    /// Registry backing this sink
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered family in Prometheus text format
    pub fn metrics_text(&self) -> Result<String, MetricsError> {
        use prometheus::{Encoder, TextEncoder};

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn counter_family(&self, name: &str) -> Option<(&IntCounterVec, &'static [&'static str])> {
        match name {
            names::TRANSITIONS_TOTAL => Some((&self.transitions, KEY_FROM_TO)),
            names::SUCCESSES_TOTAL => Some((&self.successes, KEY)),
            names::FAILURES_TOTAL => Some((&self.failures, KEY_KIND)),
            names::OPENS_TOTAL => Some((&self.opens, KEY)),
            names::REJECTIONS_TOTAL => Some((&self.rejections, KEY)),
            _ => None,
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let Some((family, label_names)) = self.counter_family(name) else {
            tracing::debug!(metric = %name, "Unknown counter, ignoring");
            return;
        };

        match family.get_metric_with_label_values(&label_values(label_names, labels)) {
            Ok(counter) => counter.inc(),
            Err(e) => tracing::debug!(metric = %name, error = %e, "Failed to resolve counter"),
        }
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        if name != names::STATE {
            tracing::debug!(metric = %name, "Unknown gauge, ignoring");
            return;
        }

        match self
            .state
            .get_metric_with_label_values(&label_values(KEY, labels))
        {
            Ok(gauge) => gauge.set(value),
            Err(e) => tracing::debug!(metric = %name, error = %e, "Failed to resolve gauge"),
        }
    }
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<IntCounterVec, MetricsError> {
    let family = IntCounterVec::new(Opts::new(name, help), label_names)?;
    registry.register(Box::new(family.clone()))?;
    Ok(family)
}

/// Order label values by the family's label names; missing labels are empty
fn label_values<'a>(label_names: &[&str], labels: &[(&str, &'a str)]) -> Vec<&'a str> {
    label_names
        .iter()
        .map(|name| {
            labels
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| *v)
                .unwrap_or("")
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// True if some sample of `family` carries every label pair and `value`
    pub(crate) fn has_sample(output: &str, family: &str, labels: &[(&str, &str)], value: &str) -> bool {
        output.lines().any(|line| {
            line.starts_with(&format!("{}{{", family))
                && labels
                    .iter()
                    .all(|(k, v)| line.contains(&format!("{}=\"{}\"", k, v)))
                && line.ends_with(&format!(" {}", value))
        })
    }

    #[test]
    fn test_registry_initialization() {
        let sink = PrometheusSink::new().unwrap();
        sink.set_gauge(names::STATE, &[("key", "cache:get")], 0.0);

        let output = sink.metrics_text().unwrap();
        assert!(has_sample(&output, names::STATE, &[("key", "cache:get")], "0"));
    }

    #[test]
    fn test_counters_accept_labels_in_any_order() {
        let sink = PrometheusSink::new().unwrap();
        sink.increment_counter(
            names::TRANSITIONS_TOTAL,
            &[("to", "open"), ("key", "db"), ("from", "closed")],
        );
        sink.increment_counter(names::FAILURES_TOTAL, &[("kind", "timeout"), ("key", "db")]);
        sink.increment_counter(names::FAILURES_TOTAL, &[("key", "db"), ("kind", "timeout")]);

        let output = sink.metrics_text().unwrap();
        assert!(has_sample(
            &output,
            names::TRANSITIONS_TOTAL,
            &[("key", "db"), ("from", "closed"), ("to", "open")],
            "1"
        ));
        assert!(has_sample(
            &output,
            names::FAILURES_TOTAL,
            &[("key", "db"), ("kind", "timeout")],
            "2"
        ));
    }

    #[test]
    fn test_unknown_metrics_are_ignored() {
        let sink = PrometheusSink::new().unwrap();
        sink.increment_counter("not_a_metric", &[("key", "x")]);
        sink.set_gauge("not_a_gauge", &[("key", "x")], 1.0);

        let output = sink.metrics_text().unwrap();
        assert!(!output.contains("not_a_metric"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        PrometheusSink::with_registry(registry.clone()).unwrap();
        assert!(matches!(
            PrometheusSink::with_registry(registry),
            Err(MetricsError::Prometheus(_))
        ));
    }

    #[test]
    fn test_label_values_fill_missing() {
        assert_eq!(
            label_values(KEY_KIND, &[("key", "a")]),
            vec!["a", ""]
        );
    }
}
