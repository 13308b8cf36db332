//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::PaymentFactoryConfig;
use crate::services::referral::DEFAULT_COMMISSION_RATE;
use crate::workers::{PendingSweeperConfig, RetryPolicy};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub reconciliation: ReconciliationConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration. Without a URL the service runs on the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
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
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment provider configuration
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub providers: PaymentFactoryConfig,
    /// Where the provider sends the payer after checkout.
    pub callback_url: Option<String>,
}

/// Reconciliation engine and background worker settings
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub commission_rate: Decimal,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    pub retry_queue_capacity: usize,
    pub sweeper: PendingSweeperConfig,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            commission_rate: DEFAULT_COMMISSION_RATE,
            lock_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
            retry_queue_capacity: 1024,
            sweeper: PendingSweeperConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.payments.validate()?;
        self.reconciliation.validate()?;

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", "8000")?,
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

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            max_connections: env_or("DB_MAX_CONNECTIONS", "20")?,
            min_connections: env_or("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
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

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentsConfig {
            providers: PaymentFactoryConfig::from_env()
                .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?,
            callback_url: env::var("PAYMENT_CALLBACK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.providers
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        if let Some(url) = &self.callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(
                    "PAYMENT_CALLBACK_URL must be a valid URL".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(ReconciliationConfig {
            commission_rate: env_or("REFERRAL_COMMISSION_RATE", "0.10")?,
            lock_timeout: Duration::from_millis(env_or("PAYMENT_LOCK_TIMEOUT_MS", "5000")?),
            retry: RetryPolicy {
                max_attempts: env_or("RECONCILE_MAX_ATTEMPTS", "3")?,
                base_delay: Duration::from_millis(env_or("RECONCILE_BASE_DELAY_MS", "2000")?),
                max_delay: Duration::from_millis(env_or("RECONCILE_MAX_DELAY_MS", "60000")?),
            },
            retry_queue_capacity: env_or("RETRY_QUEUE_CAPACITY", "1024")?,
            sweeper: PendingSweeperConfig {
                interval: Duration::from_secs(env_or("PENDING_SWEEP_INTERVAL_SECS", "300")?),
                stale_after: Duration::from_secs(env_or("PENDING_STALE_AFTER_SECS", "900")?),
                batch_size: defaults.sweeper.batch_size,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commission_rate < Decimal::ZERO || self.commission_rate > Decimal::ONE {
            return Err(ConfigError::InvalidValue(
                "REFERRAL_COMMISSION_RATE must be between 0 and 1".to_string(),
            ));
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_LOCK_TIMEOUT_MS".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILE_MAX_ATTEMPTS".to_string(),
            ));
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::InvalidValue(
                "RECONCILE_BASE_DELAY_MS must be <= RECONCILE_MAX_DELAY_MS".to_string(),
            ));
        }

        if self.retry_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("RETRY_QUEUE_CAPACITY".to_string()));
        }

        if self.sweeper.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PENDING_SWEEP_INTERVAL_SECS".to_string(),
            ));
        }

        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
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
    fn test_database_pool_bounds() {
        let config = DatabaseConfig {
            url: None,
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_ok());

        config.level = "LOUD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconciliation_defaults_are_valid() {
        let config = ReconciliationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.commission_rate, "0.10".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_commission_rate_bounds() {
        let config = ReconciliationConfig {
            commission_rate: "1.5".parse().unwrap(),
            ..ReconciliationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_ordering() {
        let config = ReconciliationConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(120),
                max_delay: Duration::from_secs(60),
            },
            ..ReconciliationConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
