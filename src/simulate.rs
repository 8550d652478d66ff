/*!
 * Scripted breaker simulation
 *
 * Drives one circuit through a pattern of outcomes so thresholds and
 * cooldowns can be tried out before they go into a config file.
 */

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use bulwark_core_resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerOverrides, CircuitState, CircuitStats,
};

use crate::error::{BulwarkError, Result};

/// One scripted action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// `s`: the operation succeeds
    Success,
    /// `f`: the operation returns an error
    Failure,
    /// `t`: the operation outlives its timeout
    Timeout,
    /// `w`: sleep for the reset timeout
    Wait,
}

impl Step {
    pub fn symbol(&self) -> char {
        match self {
            Step::Success => 's',
            Step::Failure => 'f',
            Step::Timeout => 't',
            Step::Wait => 'w',
        }
    }
}

/// Parse a pattern such as `"fffws"`. Whitespace and commas are ignored.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Step>> {
    let steps = pattern
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| match c.to_ascii_lowercase() {
            's' => Ok(Step::Success),
            'f' => Ok(Step::Failure),
            't' => Ok(Step::Timeout),
            'w' => Ok(Step::Wait),
            other => Err(BulwarkError::InvalidArgument(format!(
                "unknown pattern step '{}' (expected s, f, t or w)",
                other
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    if steps.is_empty() {
        return Err(BulwarkError::InvalidArgument("pattern is empty".to_string()));
    }
    Ok(steps)
}

/// What happened when a step ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Rejected { retry_after_ms: u64 },
    Waited { waited_ms: u64 },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => f.write_str("succeeded"),
            Outcome::Failed => f.write_str("failed"),
            Outcome::TimedOut => f.write_str("timed out"),
            Outcome::Rejected { retry_after_ms } => {
                write!(f, "rejected (retry after {}ms)", retry_after_ms)
            }
            Outcome::Waited { waited_ms } => write!(f, "waited {}ms", waited_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: Step,
    pub outcome: Outcome,
    /// Circuit state after the step
    pub state: CircuitState,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<3} {} -> {} [{}]",
            self.index,
            self.step.symbol(),
            self.outcome,
            self.state
        )
    }
}

/// Result of a full run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub key: String,
    pub steps: Vec<StepOutcome>,
    pub stats: Option<CircuitStats>,
}

/// Run `steps` against `key` on `breaker`, in order
pub async fn run_simulation(
    breaker: &CircuitBreaker,
    key: &str,
    overrides: &CircuitBreakerOverrides,
    steps: &[Step],
) -> SimulationReport {
    let effective = breaker.defaults().merge(overrides).normalized();
    let mut outcomes = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().copied().enumerate() {
        let outcome = match step {
            Step::Wait => {
                tokio::time::sleep(effective.reset_timeout).await;
                Outcome::Waited {
                    waited_ms: millis(effective.reset_timeout),
                }
            }
            Step::Success => classify(
                breaker
                    .execute_with(key, overrides, || async { Ok::<_, String>(()) })
                    .await,
            ),
            Step::Failure => classify(
                breaker
                    .execute_with(key, overrides, || async {
                        Err::<(), _>("simulated failure".to_string())
                    })
                    .await,
            ),
            Step::Timeout => {
                let hang = effective.timeout * 2;
                classify(
                    breaker
                        .execute_with(key, overrides, || async move {
                            tokio::time::sleep(hang).await;
                            Ok::<_, String>(())
                        })
                        .await,
                )
            }
        };

        let state = breaker.state(key);
        tracing::debug!(key = %key, index, step = ?step, %outcome, %state, "Simulation step");
        outcomes.push(StepOutcome {
            index: index + 1,
            step,
            outcome,
            state,
        });
    }

    SimulationReport {
        key: key.to_string(),
        steps: outcomes,
        stats: breaker.stats(key),
    }
}

fn classify(result: std::result::Result<(), BreakerError<String>>) -> Outcome {
    match result {
        Ok(()) => Outcome::Succeeded,
        Err(BreakerError::Open { retry_after, .. }) => Outcome::Rejected {
            retry_after_ms: millis(retry_after),
        },
        Err(BreakerError::Timeout { .. }) => Outcome::TimedOut,
        Err(BreakerError::Operation(_)) => Outcome::Failed,
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core_resilience::CircuitBreakerConfig;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_secs(5),
            success_threshold: 1,
        })
    }

    fn kinds(report: &SimulationReport) -> Vec<(Outcome, CircuitState)> {
        report
            .steps
            .iter()
            .map(|s| (s.outcome.clone(), s.state))
            .collect()
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(
            parse_pattern("s f, T w").unwrap(),
            vec![Step::Success, Step::Failure, Step::Timeout, Step::Wait]
        );
        assert!(matches!(
            parse_pattern("sfx"),
            Err(BulwarkError::InvalidArgument(msg)) if msg.contains("'x'")
        ));
        assert!(parse_pattern(" , ").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_wait_and_recover() {
        let breaker = breaker();
        let steps = parse_pattern("fffws").unwrap();

        let report =
            run_simulation(&breaker, "db:query", &CircuitBreakerOverrides::default(), &steps).await;

        assert_eq!(
            kinds(&report),
            vec![
                (Outcome::Failed, CircuitState::Closed),
                (Outcome::Failed, CircuitState::Open),
                (
                    Outcome::Rejected {
                        retry_after_ms: 5000
                    },
                    CircuitState::Open
                ),
                (Outcome::Waited { waited_ms: 5000 }, CircuitState::Open),
                (Outcome::Succeeded, CircuitState::Closed),
            ]
        );

        let stats = report.stats.unwrap();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_as_failures() {
        let breaker = breaker();
        let overrides = CircuitBreakerOverrides::default().with_failure_threshold(1);

        let report = run_simulation(&breaker, "slow", &overrides, &[Step::Timeout]).await;

        assert_eq!(
            kinds(&report),
            vec![(Outcome::TimedOut, CircuitState::Open)]
        );
    }

    #[test]
    fn test_step_outcome_display() {
        let line = StepOutcome {
            index: 2,
            step: Step::Failure,
            outcome: Outcome::Rejected {
                retry_after_ms: 1200,
            },
            state: CircuitState::Open,
        }
        .to_string();
        assert_eq!(line, "#2   f -> rejected (retry after 1200ms) [open]");
    }
}
