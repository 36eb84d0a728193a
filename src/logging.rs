//! Tracing setup
//!
//! `LOG_FORMAT=json` switches to structured JSON output for log shippers;
//! anything else gives human-readable lines. `RUST_LOG` wins over `LOG_LEVEL`
//! when both are set.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing from the environment
pub fn init_tracing() {
    let format = match std::env::var("LOG_FORMAT")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "json" => LogFormat::Json,
        _ => LogFormat::Plain,
    };
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing_with(&LoggingConfig { level, format });
}

pub fn init_tracing_with(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: tests may install a subscriber more than once
    let _ = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };
}

fn default_directives(level: &str) -> String {
    let level = level.to_lowercase();
    format!(
        "{level},settlement_backend={level},tower_http=info,sqlx=warn,hyper=warn,reqwest=warn"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_carry_level() {
        let directives = default_directives("DEBUG");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("settlement_backend=debug"));
    }
}
