/*!
 * Configuration types for Bulwark
 *
 * Loaded from a TOML file; every field has a default so an empty file is a
 * valid configuration.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use bulwark_core_resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, MetricsSink,
};

use crate::cache::MAX_TTL;
use crate::error::{BulwarkError, Result};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulwarkConfig {
    /// Diagnostic logging
    pub logging: LoggingConfig,

    /// Circuit breaker defaults and per-key overrides
    pub breaker: BreakerSettings,

    /// Breaker-guarded cache service
    pub cache: CacheSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level (overridden by `RUST_LOG`)
    pub level: LogLevel,

    /// Output format
    pub format: LogFormat,

    /// Log file path (None = stdout)
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Breaker defaults plus per-key overrides, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,

    /// Overrides keyed by circuit key, e.g. `[breaker.keys."cache:get"]`
    pub keys: BTreeMap<String, KeyOverrides>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            timeout_ms: u64::try_from(defaults.timeout.as_millis()).unwrap_or(u64::MAX),
            reset_timeout_ms: u64::try_from(defaults.reset_timeout.as_millis()).unwrap_or(u64::MAX),
            success_threshold: defaults.success_threshold,
            keys: BTreeMap::new(),
        }
    }
}

/// Per-key breaker overrides; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
}

impl BreakerSettings {
    /// Instance defaults for the breaker
    pub fn defaults(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            success_threshold: self.success_threshold,
        }
    }

    /// Overrides configured for `key`; empty if the key has no section
    pub fn overrides_for(&self, key: &str) -> CircuitBreakerOverrides {
        self.keys
            .get(key)
            .map(|o| CircuitBreakerOverrides {
                failure_threshold: o.failure_threshold,
                timeout: o.timeout_ms.map(Duration::from_millis),
                reset_timeout: o.reset_timeout_ms.map(Duration::from_millis),
                success_threshold: o.success_threshold,
            })
            .unwrap_or_default()
    }

    /// Effective configuration for `key` after merging its overrides
    pub fn effective_for(&self, key: &str) -> CircuitBreakerConfig {
        self.defaults().merge(&self.overrides_for(key))
    }

    /// Build the process-wide breaker reporting to `metrics`
    pub fn build_breaker(&self, metrics: Arc<dyn MetricsSink>) -> CircuitBreaker {
        CircuitBreaker::with_metrics(self.defaults(), metrics)
    }
}

/// Cache service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// TTL applied when a caller does not pass one
    pub default_ttl_secs: u64,

    /// Namespace prepended to every cache key
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            key_prefix: "bulwark".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// A single semantic check that failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl BulwarkConfig {
    /// Read, parse, and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| BulwarkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: BulwarkConfig = toml::from_str(contents)?;
        config.validate().map_err(BulwarkError::ConfigInvalid)?;
        Ok(config)
    }

    /// Semantic checks. Returns every failure, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let breaker = &self.breaker;

        check_threshold(&mut errors, "breaker.failure_threshold", Some(breaker.failure_threshold));
        check_threshold(&mut errors, "breaker.success_threshold", Some(breaker.success_threshold));
        check_timeout(&mut errors, "breaker.timeout_ms", Some(breaker.timeout_ms));

        for (key, overrides) in &breaker.keys {
            if key.trim().is_empty() {
                errors.push(ValidationError::new("breaker.keys", "key must not be empty"));
                continue;
            }
            let field = |name: &str| format!("breaker.keys.\"{}\".{}", key, name);
            check_threshold(&mut errors, &field("failure_threshold"), overrides.failure_threshold);
            check_threshold(&mut errors, &field("success_threshold"), overrides.success_threshold);
            check_timeout(&mut errors, &field("timeout_ms"), overrides.timeout_ms);
        }

        if self.cache.key_prefix.trim().is_empty() {
            errors.push(ValidationError::new("cache.key_prefix", "must not be empty"));
        }
        if self.cache.default_ttl_secs == 0 {
            errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
        } else if self.cache.default_ttl_secs > MAX_TTL.as_secs() {
            errors.push(ValidationError::new(
                "cache.default_ttl_secs",
                format!("must be at most {}", MAX_TTL.as_secs()),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<BulwarkConfig> {
    BulwarkConfig::from_file(path)
}

fn check_threshold(errors: &mut Vec<ValidationError>, field: &str, value: Option<u32>) {
    if value == Some(0) {
        errors.push(ValidationError::new(field, "must be at least 1"));
    }
}

fn check_timeout(errors: &mut Vec<ValidationError>, field: &str, value: Option<u64>) {
    if value == Some(0) {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = BulwarkConfig::from_toml_str("").unwrap();
        assert_eq!(config, BulwarkConfig::default());
        assert_eq!(config.breaker.defaults(), CircuitBreakerConfig::default());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_per_key_overrides() {
        let config = BulwarkConfig::from_toml_str(
            r#"
            [breaker]
            failure_threshold = 3
            reset_timeout_ms = 30000

            [breaker.keys."cache:get"]
            timeout_ms = 200

            [breaker.keys."db:query:User"]
            failure_threshold = 10
            success_threshold = 2
            "#,
        )
        .unwrap();

        let cache = config.breaker.effective_for("cache:get");
        assert_eq!(cache.failure_threshold, 3);
        assert_eq!(cache.timeout, Duration::from_millis(200));
        assert_eq!(cache.reset_timeout, Duration::from_secs(30));

        let db = config.breaker.effective_for("db:query:User");
        assert_eq!(db.failure_threshold, 10);
        assert_eq!(db.success_threshold, 2);
        assert_eq!(db.timeout, Duration::from_secs(10));

        assert!(config.breaker.overrides_for("unlisted").is_empty());
    }

    #[test]
    fn test_validation_reports_all_errors() {
        let err = BulwarkConfig::from_toml_str(
            r#"
            [breaker]
            failure_threshold = 0
            timeout_ms = 0

            [breaker.keys."cache:get"]
            success_threshold = 0

            [cache]
            key_prefix = ""
            "#,
        )
        .unwrap_err();

        match err {
            BulwarkError::ConfigInvalid(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec![
                        "breaker.failure_threshold",
                        "breaker.timeout_ms",
                        "breaker.keys.\"cache:get\".success_threshold",
                        "cache.key_prefix",
                    ]
                );
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_default_ttl_upper_bound() {
        let err = BulwarkConfig::from_toml_str("[cache]\ndefault_ttl_secs = 9223372036854775807")
            .unwrap_err();
        match err {
            BulwarkError::ConfigInvalid(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "cache.default_ttl_secs");
                assert!(errors[0].message.starts_with("must be at most"));
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }

        let at_limit = format!("[cache]\ndefault_ttl_secs = {}", MAX_TTL.as_secs());
        assert!(BulwarkConfig::from_toml_str(&at_limit).is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = BulwarkConfig::from_toml_str(
            r#"
            [breaker.keys."cache:get"]
            timeout = 200
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BulwarkError::ConfigParse(_)));
    }

    #[test]
    fn test_logging_section() {
        let config = BulwarkConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"
            format = "json"
            file = "/tmp/bulwark.log"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/bulwark.log")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[breaker]\nfailure_threshold = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.breaker.failure_threshold, 2);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/bulwark.toml")).unwrap_err();
        assert!(matches!(err, BulwarkError::ConfigRead { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);
    }
}
