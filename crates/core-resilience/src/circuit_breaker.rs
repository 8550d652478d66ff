//! Keyed circuit breaker for fault tolerance
//!
//! One breaker instance tracks any number of independent circuits, each
//! identified by an opaque key chosen by the caller (`"cache:get"`,
//! `"db:query:User"`, ...). Every circuit has three states:
//! - Closed: Normal operation, calls pass through and failures are counted
//! - Open: Dependency is unhealthy, calls fail immediately
//! - HalfOpen: Cooldown elapsed, probe calls decide whether to close or reopen
//!
//! ```text
//! Closed ──(failures >= failure_threshold)──▶ Open
//! Open ──(reset_timeout elapsed, next call)──▶ HalfOpen
//! HalfOpen ──(successes >= success_threshold)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! Every call is also bounded by a timeout. A timed-out call counts as a
//! failure and its future is dropped.

use crate::error::BreakerError;
use crate::metrics::{names, MetricsSink, NoopMetrics};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// State of a single circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Probing whether the dependency recovered
    HalfOpen,
    /// Calls fail fast until the cooldown elapses
    Open,
}

impl CircuitState {
    /// Label value used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
///
/// Resolved once per call and immutable for the duration of that call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit
    pub failure_threshold: u32,
    /// Maximum wall-clock time allowed for the wrapped operation
    pub timeout: Duration,
    /// Cooldown after opening before a probe is admitted
    pub reset_timeout: Duration,
    /// Consecutive successes in HalfOpen that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Merge per-call overrides over this configuration
    pub fn merge(&self, overrides: &CircuitBreakerOverrides) -> Self {
        Self {
            failure_threshold: overrides.failure_threshold.unwrap_or(self.failure_threshold),
            timeout: overrides.timeout.unwrap_or(self.timeout),
            reset_timeout: overrides.reset_timeout.unwrap_or(self.reset_timeout),
            success_threshold: overrides.success_threshold.unwrap_or(self.success_threshold),
        }
    }

    /// Clamp values that would make the state machine meaningless.
    ///
    /// Zero thresholds behave as 1 and a zero timeout behaves as 1ms.
    /// A zero `reset_timeout` is legal: the next call after opening probes.
    pub fn normalized(mut self) -> Self {
        if self.failure_threshold == 0 {
            tracing::warn!("failure_threshold of 0 clamped to 1");
            self.failure_threshold = 1;
        }
        if self.success_threshold == 0 {
            tracing::warn!("success_threshold of 0 clamped to 1");
            self.success_threshold = 1;
        }
        if self.timeout.is_zero() {
            tracing::warn!("timeout of 0 clamped to 1ms");
            self.timeout = Duration::from_millis(1);
        }
        self
    }
}

/// Per-call overrides merged over the breaker's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub timeout: Option<Duration>,
    pub reset_timeout: Option<Duration>,
    pub success_threshold: Option<u32>,
}

impl CircuitBreakerOverrides {
    /// True if no field is overridden
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = Some(reset_timeout);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }
}

/// Snapshot of one circuit, returned by [`CircuitBreaker::stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Internal per-key record
#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `opened_at`; cooldown math only uses this
    opened_instant: Option<Instant>,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            opened_instant: None,
        }
    }

    fn transition(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        self.consecutive_successes = 0;

        match to {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.opened_instant = None;
            }
            CircuitState::Open => {
                self.opened_at = Some(Utc::now());
                self.opened_instant = Some(Instant::now());
            }
        }

        Transition { from, to }
    }

    fn stats(&self, key: &str) -> CircuitStats {
        CircuitStats {
            key: key.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            opened_at: self.opened_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Error,
    Timeout,
}

impl FailureKind {
    fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Error => "error",
            FailureKind::Timeout => "timeout",
        }
    }
}

struct Inner {
    defaults: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitRecord>>,
    metrics: Arc<dyn MetricsSink>,
}

/// Circuit breaker guarding any number of keyed dependencies
///
/// Cloning is cheap and every clone shares the same circuits, so one instance
/// is built at startup and handed to all callers.
///
/// # Example
/// ```no_run
/// use bulwark_core_resilience::{BreakerError, CircuitBreaker};
///
/// # async fn example() -> Result<(), BreakerError<std::io::Error>> {
/// let breaker = CircuitBreaker::new_default();
///
/// let value = breaker
///     .execute("db:query:User", || async {
///         // Your potentially failing operation
///         Ok::<_, std::io::Error>(42)
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("defaults", &self.inner.defaults)
            .field("circuits", &self.circuits().len())
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new_default()
    }
}

impl CircuitBreaker {
    /// Create a breaker with the given per-call defaults and no metrics sink
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::with_metrics(defaults, Arc::new(NoopMetrics))
    }

    /// Create a breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Create a breaker that reports events to `metrics`
    pub fn with_metrics(defaults: CircuitBreakerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults: defaults.normalized(),
                circuits: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Defaults applied to calls without overrides
    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.inner.defaults
    }

    /// Execute an operation under the circuit for `key` using the defaults
    pub async fn execute<F, Fut, T, E>(&self, key: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(key, &CircuitBreakerOverrides::default(), operation)
            .await
    }

    /// Execute an operation under the circuit for `key`, merging `overrides`
    /// over the defaults for this call only.
    ///
    /// The operation is not invoked if the circuit is open and its cooldown
    /// has not elapsed. Otherwise it races against the configured timeout.
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        key: &str,
        overrides: &CircuitBreakerOverrides,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = self.inner.defaults.merge(overrides).normalized();

        if let Some(retry_after) = self.admit(key, &config) {
            tracing::debug!(key = %key, retry_after_ms = millis(retry_after), "Circuit open, rejecting call");
            self.emit(|m| m.increment_counter(names::REJECTIONS_TOTAL, &[("key", key)]));
            return Err(BreakerError::Open {
                key: key.to_string(),
                retry_after,
            });
        }

        match tokio::time::timeout(config.timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success(key, &config);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(key, &config, FailureKind::Error);
                Err(BreakerError::Operation(e))
            }
            Err(_) => {
                tracing::debug!(key = %key, timeout_ms = millis(config.timeout), "Operation timed out");
                self.on_failure(key, &config, FailureKind::Timeout);
                Err(BreakerError::Timeout {
                    key: key.to_string(),
                    timeout: config.timeout,
                })
            }
        }
    }

    /// Current state of a circuit. Unknown keys are Closed.
    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits()
            .get(key)
            .map(|record| record.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Full snapshot of a circuit, or `None` if the key was never used
    pub fn stats(&self, key: &str) -> Option<CircuitStats> {
        self.circuits().get(key).map(|record| record.stats(key))
    }

    /// Keys that currently have a record, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.circuits().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshots of every circuit, sorted by key
    pub fn snapshot(&self) -> Vec<CircuitStats> {
        let mut all: Vec<CircuitStats> = self
            .circuits()
            .iter()
            .map(|(key, record)| record.stats(key))
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Forget a circuit; the next call recreates it Closed
    pub fn reset(&self, key: &str) {
        let removed = self.circuits().remove(key).is_some();
        if removed {
            tracing::info!(key = %key, "Circuit reset");
            self.emit(|m| {
                m.set_gauge(names::STATE, &[("key", key)], CircuitState::Closed.gauge_value())
            });
        }
    }

    /// Forget every circuit
    pub fn reset_all(&self) {
        let keys: Vec<String> = self.circuits().drain().map(|(key, _)| key).collect();
        tracing::info!(count = keys.len(), "All circuits reset");
        for key in &keys {
            self.emit(|m| {
                m.set_gauge(
                    names::STATE,
                    &[("key", key.as_str())],
                    CircuitState::Closed.gauge_value(),
                )
            });
        }
    }

    /// Entry check. Returns the remaining cooldown if the call must fail fast.
    fn admit(&self, key: &str, config: &CircuitBreakerConfig) -> Option<Duration> {
        let now = Instant::now();
        let (created, transition) = {
            let mut circuits = self.circuits();
            let created = !circuits.contains_key(key);
            let record = circuits
                .entry(key.to_string())
                .or_insert_with(CircuitRecord::new);

            if record.state != CircuitState::Open {
                (created, None)
            } else {
                let elapsed = record
                    .opened_instant
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(config.reset_timeout);

                if elapsed < config.reset_timeout {
                    return Some(config.reset_timeout - elapsed);
                }
                (created, Some(record.transition(CircuitState::HalfOpen)))
            }
        };

        if created {
            tracing::debug!(key = %key, "Circuit created");
            self.emit(|m| {
                m.set_gauge(names::STATE, &[("key", key)], CircuitState::Closed.gauge_value())
            });
        }
        if let Some(transition) = transition {
            self.report_transition(key, transition);
        }
        None
    }

    fn on_success(&self, key: &str, config: &CircuitBreakerConfig) {
        let transition = {
            let mut circuits = self.circuits();
            let record = circuits
                .entry(key.to_string())
                .or_insert_with(CircuitRecord::new);
            record.last_success_at = Some(Utc::now());

            match record.state {
                CircuitState::Closed => {
                    record.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    record.consecutive_successes = record.consecutive_successes.saturating_add(1);
                    if record.consecutive_successes >= config.success_threshold {
                        Some(record.transition(CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // A call admitted before a concurrent call reopened the circuit.
                // It does not get to close it.
                CircuitState::Open => None,
            }
        };

        self.emit(|m| m.increment_counter(names::SUCCESSES_TOTAL, &[("key", key)]));
        if let Some(transition) = transition {
            self.report_transition(key, transition);
        }
    }

    fn on_failure(&self, key: &str, config: &CircuitBreakerConfig, kind: FailureKind) {
        let (failures, transition) = {
            let mut circuits = self.circuits();
            let record = circuits
                .entry(key.to_string())
                .or_insert_with(CircuitRecord::new);
            record.last_failure_at = Some(Utc::now());
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);

            let transition = match record.state {
                CircuitState::HalfOpen => Some(record.transition(CircuitState::Open)),
                CircuitState::Closed if record.consecutive_failures >= config.failure_threshold => {
                    Some(record.transition(CircuitState::Open))
                }
                _ => None,
            };
            (record.consecutive_failures, transition)
        };

        tracing::debug!(key = %key, kind = kind.as_str(), consecutive_failures = failures, "Operation failed");
        self.emit(|m| {
            m.increment_counter(
                names::FAILURES_TOTAL,
                &[("key", key), ("kind", kind.as_str())],
            )
        });
        if let Some(transition) = transition {
            self.report_transition(key, transition);
        }
    }

    fn report_transition(&self, key: &str, transition: Transition) {
        let Transition { from, to } = transition;
        match to {
            CircuitState::Open => {
                tracing::warn!(key = %key, from = %from, "Circuit opened");
            }
            CircuitState::HalfOpen => {
                tracing::info!(key = %key, "Circuit half-open, admitting probe");
            }
            CircuitState::Closed => {
                tracing::info!(key = %key, from = %from, "Circuit closed");
            }
        }

        self.emit(|m| {
            m.increment_counter(
                names::TRANSITIONS_TOTAL,
                &[("key", key), ("from", from.as_str()), ("to", to.as_str())],
            );
            if to == CircuitState::Open {
                m.increment_counter(names::OPENS_TOTAL, &[("key", key)]);
            }
            m.set_gauge(names::STATE, &[("key", key)], to.gauge_value());
        });
    }

    /// Hand an event to the sink. A panicking sink is logged and ignored.
    fn emit<F>(&self, report: F)
    where
        F: FnOnce(&dyn MetricsSink),
    {
        let sink = self.inner.metrics.as_ref();
        if panic::catch_unwind(AssertUnwindSafe(|| report(sink))).is_err() {
            tracing::debug!("Metrics sink panicked; event dropped");
        }
    }

    // The lock is never held across an await and no code path panics while
    // holding it, so a poisoned map is still consistent.
    fn circuits(&self) -> MutexGuard<'_, HashMap<String, CircuitRecord>> {
        self.inner
            .circuits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Milliseconds for log fields, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
