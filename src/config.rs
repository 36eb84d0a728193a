//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub processor: ProcessorConfig,
    pub settlement: SettlementConfig,
    pub webhook: WebhookConfig,
    pub reconciler: ReconcilerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment processor API access
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Applies to creation calls only
    pub max_retries: u32,
}

/// Checkout and fee settings
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub default_fee_percent: Decimal,
    pub currency: String,
    pub max_session_amount_minor: i64,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub onboarding_return_url: String,
    pub onboarding_refresh_url: String,
    pub proximity_fallback_enabled: bool,
    pub proximity_window_secs: i64,
    pub order_service_url: Option<String>,
}

/// Inbound webhook settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_secs: i64,
    pub signature_bypass: bool,
}

/// Background worker settings
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval_secs: u64,
    pub stale_after_secs: i64,
    pub abandon_after_secs: i64,
    pub batch_size: i64,
    pub webhook_retry_interval_secs: u64,
    pub webhook_max_retries: i32,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            processor: ProcessorConfig::from_env()?,
            settlement: SettlementConfig::from_env()?,
            webhook: WebhookConfig::from_env(&environment)?,
            reconciler: ReconcilerConfig::from_env()?,
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.processor.validate()?;
        self.settlement.validate()?;
        self.webhook.validate()?;
        self.reconciler.validate()?;

        if self.is_production() && self.webhook.signature_bypass {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_SIGNATURE_BYPASS cannot be enabled in production".to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_default(),
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingVariable("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ProcessorConfig {
            api_key: env::var("PROCESSOR_API_KEY").unwrap_or_default(),
            base_url: env::var("PROCESSOR_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: parse_var("PROCESSOR_TIMEOUT_SECS", "10")?,
            max_retries: parse_var("PROCESSOR_MAX_RETRIES", "2")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingVariable("PROCESSOR_API_KEY".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let frontend = env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let frontend = frontend.trim_end_matches('/');

        Ok(SettlementConfig {
            default_fee_percent: parse_var("DEFAULT_PLATFORM_FEE_PERCENT", "5.0")?,
            currency: env::var("SETTLEMENT_CURRENCY")
                .unwrap_or_else(|_| "usd".to_string())
                .to_lowercase(),
            max_session_amount_minor: parse_var("MAX_SESSION_AMOUNT_MINOR", "99999999")?,
            checkout_success_url: env::var("CHECKOUT_SUCCESS_URL").unwrap_or_else(|_| {
                format!("{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}", frontend)
            }),
            checkout_cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/payment/cancel", frontend)),
            onboarding_return_url: env::var("ONBOARDING_RETURN_URL")
                .unwrap_or_else(|_| format!("{}/payouts/onboarding/complete", frontend)),
            onboarding_refresh_url: env::var("ONBOARDING_REFRESH_URL")
                .unwrap_or_else(|_| format!("{}/payouts/onboarding/refresh", frontend)),
            proximity_fallback_enabled: parse_var("PROXIMITY_FALLBACK_ENABLED", "true")?,
            proximity_window_secs: parse_var("PROXIMITY_WINDOW_SECS", "300")?,
            order_service_url: env::var("ORDER_SERVICE_URL").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_fee_percent < Decimal::ZERO || self.default_fee_percent > Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_PLATFORM_FEE_PERCENT must be within 0..=100".to_string(),
            ));
        }

        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue("SETTLEMENT_CURRENCY".to_string()));
        }

        if self.max_session_amount_minor <= 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_SESSION_AMOUNT_MINOR".to_string(),
            ));
        }

        if self.proximity_window_secs <= 0 {
            return Err(ConfigError::InvalidValue("PROXIMITY_WINDOW_SECS".to_string()));
        }

        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env(environment: &str) -> Result<Self, ConfigError> {
        let requested_bypass: bool = parse_var("WEBHOOK_SIGNATURE_BYPASS", "false")?;
        Ok(WebhookConfig {
            secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            tolerance_secs: parse_var("WEBHOOK_TOLERANCE_SECS", "300")?,
            // Never honored in production
            signature_bypass: requested_bypass && !environment.eq_ignore_ascii_case("production"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() && !self.signature_bypass {
            return Err(ConfigError::MissingVariable("WEBHOOK_SECRET".to_string()));
        }

        if self.tolerance_secs <= 0 {
            return Err(ConfigError::InvalidValue("WEBHOOK_TOLERANCE_SECS".to_string()));
        }

        Ok(())
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ReconcilerConfig {
            poll_interval_secs: parse_var("RECONCILER_POLL_INTERVAL_SECS", "60")?,
            stale_after_secs: parse_var("RECONCILER_STALE_AFTER_SECS", "900")?,
            abandon_after_secs: parse_var("RECONCILER_ABANDON_AFTER_SECS", "86400")?,
            batch_size: parse_var("RECONCILER_BATCH_SIZE", "50")?,
            webhook_retry_interval_secs: parse_var("WEBHOOK_RETRY_INTERVAL_SECS", "60")?,
            webhook_max_retries: parse_var("WEBHOOK_MAX_RETRIES", "5")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 || self.webhook_retry_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "worker intervals must be positive".to_string(),
            ));
        }

        if self.abandon_after_secs < self.stale_after_secs {
            return Err(ConfigError::ValidationFailed(
                "RECONCILER_ABANDON_AFTER_SECS must be >= RECONCILER_STALE_AFTER_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            stale_after_secs: 900,
            abandon_after_secs: 86_400,
            batch_size: 50,
            webhook_retry_interval_secs: 60,
            webhook_max_retries: 5,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settlement() -> SettlementConfig {
        SettlementConfig {
            default_fee_percent: Decimal::new(50, 1),
            currency: "usd".to_string(),
            max_session_amount_minor: 99_999_999,
            checkout_success_url: "http://localhost/success".to_string(),
            checkout_cancel_url: "http://localhost/cancel".to_string(),
            onboarding_return_url: "http://localhost/return".to_string(),
            onboarding_refresh_url: "http://localhost/refresh".to_string(),
            proximity_fallback_enabled: true,
            proximity_window_secs: 300,
            order_service_url: None,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fee_percent_bounds() {
        assert!(settlement().validate().is_ok());

        let mut config = settlement();
        config.default_fee_percent = Decimal::new(1001, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_secret_required_without_bypass() {
        let config = WebhookConfig {
            secret: String::new(),
            tolerance_secs: 300,
            signature_bypass: false,
        };
        assert!(config.validate().is_err());

        let bypassed = WebhookConfig {
            signature_bypass: true,
            ..config
        };
        assert!(bypassed.validate().is_ok());
    }

    #[test]
    fn test_reconciler_windows_are_ordered() {
        let mut config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        config.abandon_after_secs = 10;
        assert!(config.validate().is_err());
    }
}
