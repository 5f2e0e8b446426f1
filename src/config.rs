//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub token_cache: TokenCacheConfig,
    pub reconciliation: ReconciliationConfig,
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

/// Outbound HTTP configuration shared by all rails
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

/// Retry budget for idempotent provider calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

const MAX_TOKEN_SAFETY_MARGIN_SECS: u64 = 3600;
const MAX_RECONCILIATION_TOLERANCE_MINOR_UNITS: u64 = 100;

#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    pub safety_margin_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub tolerance_minor_units: u64,
    /// Fall back to the first same-currency invoice when none is within tolerance.
    pub match_outside_tolerance: bool,
}

/// Provider API environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" | "test" | "uat" => Ok(Environment::Sandbox),
            "production" | "prod" | "live" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidValue(format!(
                "environment must be sandbox or production, got {}",
                other
            ))),
        }
    }
}

impl Environment {
    pub fn from_env(key: &str) -> Result<Self, ConfigError> {
        match env::var(key) {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string())),
            Err(_) => Ok(Environment::Sandbox),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            logging: LoggingConfig::from_env()?,
            http: HttpConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            token_cache: TokenCacheConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        self.http.validate()?;
        self.retry.validate()?;
        self.token_cache.validate()?;
        self.reconciliation.validate()?;

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

impl HttpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(HttpConfig {
            timeout_secs: env::var("PAYMENT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_TIMEOUT_SECONDS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_TIMEOUT_SECONDS cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl RetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(RetryConfig {
            max_attempts: env::var("PAYMENT_RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_RETRY_MAX_ATTEMPTS".to_string()))?,
            base_delay_ms: env::var("PAYMENT_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("PAYMENT_RETRY_BASE_DELAY_MS".to_string())
                })?,
            max_delay_ms: env::var("PAYMENT_RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_RETRY_MAX_DELAY_MS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "PAYMENT_RETRY_BASE_DELAY_MS must be <= PAYMENT_RETRY_MAX_DELAY_MS".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl TokenCacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(TokenCacheConfig {
            safety_margin_secs: env::var("TOKEN_SAFETY_MARGIN_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("TOKEN_SAFETY_MARGIN_SECONDS".to_string())
                })?,
        })
    }

    /// Provider tokens live for about an hour; a margin that large would
    /// refetch on every call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safety_margin_secs >= MAX_TOKEN_SAFETY_MARGIN_SECS {
            return Err(ConfigError::ValidationFailed(format!(
                "TOKEN_SAFETY_MARGIN_SECONDS must be below {}",
                MAX_TOKEN_SAFETY_MARGIN_SECS
            )));
        }
        Ok(())
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ReconciliationConfig {
            tolerance_minor_units: env::var("RECONCILIATION_TOLERANCE_MINOR_UNITS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("RECONCILIATION_TOLERANCE_MINOR_UNITS".to_string())
                })?,
            match_outside_tolerance: env::var("RECONCILIATION_MATCH_OUTSIDE_TOLERANCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("RECONCILIATION_MATCH_OUTSIDE_TOLERANCE".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tolerance_minor_units > MAX_RECONCILIATION_TOLERANCE_MINOR_UNITS {
            return Err(ConfigError::ValidationFailed(format!(
                "RECONCILIATION_TOLERANCE_MINOR_UNITS must be at most {}",
                MAX_RECONCILIATION_TOLERANCE_MINOR_UNITS
            )));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance_minor_units: 1,
            match_outside_tolerance: true,
        }
    }
}

/// Reads a required variable.
pub fn required_var(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

/// Reads an optional variable, treating blank values as unset.
pub fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
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
