//! Error types surfaced by the circuit breaker

use std::time::Duration;
use thiserror::Error;

/// Outcome classification returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
///
/// `E` is the wrapped operation's own error type. It is carried unchanged in
/// [`BreakerError::Operation`]; the breaker only observes it to update counters.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open and the cooldown has not elapsed.
    /// The operation was never invoked.
    #[error("circuit '{key}' is open, retry after {retry_after:?}")]
    Open { key: String, retry_after: Duration },

    /// The operation did not settle within the configured timeout.
    /// The operation future was dropped when the deadline fired.
    #[error("operation on circuit '{key}' timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// The operation itself failed
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True if the call was rejected without invoking the operation
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// True if the operation exceeded its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout { .. })
    }

    /// Remaining cooldown for a fast-failed call
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BreakerError::Open { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Key of the circuit that produced a breaker-level error.
    /// `None` for operation errors, which carry no breaker context.
    pub fn key(&self) -> Option<&str> {
        match self {
            BreakerError::Open { key, .. } | BreakerError::Timeout { key, .. } => Some(key),
            BreakerError::Operation(_) => None,
        }
    }

    /// Unwrap the operation's own error, if that is what this is
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Map the operation error, keeping breaker-level variants intact
    pub fn map_operation<F, O>(self, f: O) -> BreakerError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            BreakerError::Open { key, retry_after } => BreakerError::Open { key, retry_after },
            BreakerError::Timeout { key, timeout } => BreakerError::Timeout { key, timeout },
            BreakerError::Operation(e) => BreakerError::Operation(f(e)),
        }
    }
}
