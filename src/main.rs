/*!
 * Bulwark CLI
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bulwark::config::BulwarkConfig;
use bulwark::error::{EXIT_SUCCESS, Result};
use bulwark::logging::init_logging;
use bulwark::simulate::{parse_pattern, run_simulation};
use bulwark::{load_config, CircuitBreakerConfig, CircuitBreakerOverrides, PrometheusSink};

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version, about = "Keyed circuit breaker: validate configs and simulate failure patterns", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the effective breaker settings
    Check {
        /// Path to the TOML config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },

    /// Drive a circuit through a scripted pattern of outcomes
    Simulate {
        /// Path to the TOML config file (defaults apply when omitted)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Circuit key, e.g. "cache:get"
        #[arg(short, long)]
        key: String,

        /// Steps: s = success, f = failure, t = timeout, w = wait for cooldown
        #[arg(short, long)]
        pattern: String,

        /// Override the failure threshold for this run
        #[arg(long)]
        failure_threshold: Option<u32>,

        /// Override the operation timeout (milliseconds)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Override the open-state cooldown (milliseconds)
        #[arg(long)]
        reset_timeout_ms: Option<u64>,

        /// Override the half-open success threshold
        #[arg(long)]
        success_threshold: Option<u32>,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(config),
        Commands::Simulate {
            config,
            key,
            pattern,
            failure_threshold,
            timeout_ms,
            reset_timeout_ms,
            success_threshold,
        } => {
            let flags = CircuitBreakerOverrides {
                failure_threshold,
                timeout: timeout_ms.map(Duration::from_millis),
                reset_timeout: reset_timeout_ms.map(Duration::from_millis),
                success_threshold,
            };
            simulate(config, &key, &pattern, flags)
        }
    }
}

fn check(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    init_logging(&config.logging)?;
    tracing::info!(
        path = %path.display(),
        keys = config.breaker.keys.len(),
        "Configuration loaded"
    );

    println!("Configuration OK: {}", path.display());
    println!();
    println!("Breaker defaults:");
    print_breaker_config(&config.breaker.defaults());

    for key in config.breaker.keys.keys() {
        println!();
        println!("Key \"{}\":", key);
        print_breaker_config(&config.breaker.effective_for(key));
    }

    println!();
    println!("Cache:");
    println!("  key_prefix        {}", config.cache.key_prefix);
    println!("  default_ttl       {}s", config.cache.default_ttl_secs);
    Ok(())
}

fn print_breaker_config(config: &CircuitBreakerConfig) {
    println!("  failure_threshold {}", config.failure_threshold);
    println!("  timeout           {}ms", config.timeout.as_millis());
    println!("  reset_timeout     {}ms", config.reset_timeout.as_millis());
    println!("  success_threshold {}", config.success_threshold);
}

fn simulate(
    config_path: Option<PathBuf>,
    key: &str,
    pattern: &str,
    flags: CircuitBreakerOverrides,
) -> Result<()> {
    let config = match config_path {
        Some(ref path) => load_config(path)?,
        None => BulwarkConfig::default(),
    };
    init_logging(&config.logging)?;

    let steps = parse_pattern(pattern)?;
    let overrides = merge_overrides(config.breaker.overrides_for(key), flags);

    let sink = Arc::new(PrometheusSink::new()?);
    let breaker = config.breaker.build_breaker(sink.clone());

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(run_simulation(&breaker, key, &overrides, &steps));

    for outcome in &report.steps {
        println!("{}", outcome);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&report.stats)?);
    println!();
    print!("{}", sink.metrics_text()?);
    Ok(())
}

/// Command-line flags win over the config file's per-key section
fn merge_overrides(
    base: CircuitBreakerOverrides,
    flags: CircuitBreakerOverrides,
) -> CircuitBreakerOverrides {
    CircuitBreakerOverrides {
        failure_threshold: flags.failure_threshold.or(base.failure_threshold),
        timeout: flags.timeout.or(base.timeout),
        reset_timeout: flags.reset_timeout.or(base.reset_timeout),
        success_threshold: flags.success_threshold.or(base.success_threshold),
    }
}
