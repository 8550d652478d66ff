/*!
 * Error types for Bulwark
 */

use std::convert::Infallible;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use bulwark_core_resilience::BreakerError;

use crate::cache::CacheStoreError;
use crate::config::ValidationError;

pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

#[derive(Debug, Error)]
pub enum BulwarkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for the schema
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but failed semantic checks
    #[error("invalid configuration: {}", join_errors(.0))]
    ConfigInvalid(Vec<ValidationError>),

    /// Malformed command-line input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Logging could not be initialized
    #[error("logging error: {0}")]
    Logging(String),

    /// Cache store or payload error
    #[error("cache error: {0}")]
    Cache(String),

    /// A breaker-level rejection or timeout; never carries `Operation`
    #[error("{0}")]
    Breaker(BreakerError<Infallible>),

    /// Metrics registry error
    #[error("metrics error: {0}")]
    Metrics(#[from] bulwark_observability::MetricsError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BulwarkError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BulwarkError::ConfigRead { .. }
            | BulwarkError::ConfigParse(_)
            | BulwarkError::ConfigInvalid(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }

    /// True for failures caused by an open circuit or a timeout
    pub fn is_breaker(&self) -> bool {
        matches!(self, BulwarkError::Breaker(_))
    }

    /// Remaining cooldown when an open circuit rejected the call
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BulwarkError::Breaker(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Open circuits and timeouts become [`BulwarkError::Breaker`]; store
/// failures become [`BulwarkError::Cache`]
impl From<BreakerError<CacheStoreError>> for BulwarkError {
    fn from(err: BreakerError<CacheStoreError>) -> Self {
        match err {
            BreakerError::Operation(e) => BulwarkError::Cache(e.to_string()),
            BreakerError::Open { key, retry_after } => {
                BulwarkError::Breaker(BreakerError::Open { key, retry_after })
            }
            BreakerError::Timeout { key, timeout } => {
                BulwarkError::Breaker(BreakerError::Timeout { key, timeout })
            }
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
