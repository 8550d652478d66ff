/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BulwarkError, Result};

/// Crates whose events pass the default filter
const LOG_TARGETS: &[&str] = &[
    "bulwark",
    "bulwark_core_resilience",
    "bulwark_observability",
];

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let log_level = config.level.to_tracing_level();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(log_level)))
        .map_err(|e| BulwarkError::Logging(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = config.file {
        init_file_logging(log_path, config.format, env_filter)
    } else {
        init_stderr_logging(config.format, env_filter)
    }
}

fn default_directives(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Log to stderr so command output on stdout stays machine-readable
fn init_stderr_logging(format: LogFormat, env_filter: EnvFilter) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| BulwarkError::Logging(e.to_string()))
}

fn init_file_logging(log_path: &Path, format: LogFormat, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path).map_err(|e| {
        BulwarkError::Logging(format!(
            "Failed to create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_target(true)
                    .with_ansi(false)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| BulwarkError::Logging(e.to_string()))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(Level::DEBUG)));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
