//! Tracing initialisation for chunkworker
//!
//! Every subscriber writes to stderr: a worker process uses stdout as its
//! message channel, so nothing else may ever be printed there.

use anyhow::Result;
use chunkworker_config::{LogFormat, LogLevel, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Build the filter for a config: explicit directives, then `RUST_LOG`, then the level
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let directives = match config.filter {
        Some(ref filter) => format!("{},{}", config.level, filter),
        None => config.level.to_string(),
    };

    EnvFilter::try_new(&directives)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from configuration
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let filter = build_env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    // Use try_init to avoid panic if global subscriber already set
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple text tracing at the given level
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let level: LogLevel = log_level
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    init_logging_from_config(&LoggingConfig {
        level,
        ..LoggingConfig::default()
    })
}

/// Initialize tracing for a worker process, honouring `--log-level` when given
pub fn init_worker_tracing(log_level: Option<&str>) -> Result<()> {
    match log_level {
        Some(level) => init_simple_tracing(level),
        None => init_logging_from_config(&LoggingConfig::default()),
    }
}
