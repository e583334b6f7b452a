// Lease-arbiter configuration.
//
// Centralizes environment variable parsing with defaults for local
// development, following the same `from_env` / injectable-lookup split
// the host service uses for its own server config.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_EPSILON_MS: i64 = 5_000;
const DEFAULT_LINGER_MS: i64 = 60_000;
const DEFAULT_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000; // 30 days
const DEFAULT_SWEEP_CADENCE_SECS: u64 = 4 * 60 * 60; // 4 hours

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LEASE_ARBITER_TABLE is required")]
    MissingTable,
    #[error("LEASE_ARBITER_CONSTANTS_TABLE is required")]
    MissingConstantsTable,
    #[error("table name `{0}` is not a valid SQL identifier")]
    InvalidIdentifier(String),
    #[error("epsilon-ms ({epsilon_ms}) must be smaller than linger-ms ({linger_ms})")]
    EpsilonNotBelowLinger { epsilon_ms: i64, linger_ms: i64 },
    #[error("linger-ms ({linger_ms}) must be smaller than retention-ms ({retention_ms})")]
    LingerNotBelowRetention { linger_ms: i64, retention_ms: i64 },
}

/// Lease-arbiter configuration.
///
/// Constructed via [`Config::from_env`], which reads environment variables
/// and falls back to sensible development defaults for the tunable
/// numeric knobs (the table names have no default — they are required).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the lease table.
    pub lease_table: String,
    /// Name of the `(epsilon, linger)` constants table.
    pub constants_table: String,
    /// Consolidation window, in milliseconds.
    pub epsilon_ms: i64,
    /// Lease validity duration, in milliseconds.
    pub linger_ms: i64,
    /// Row retention horizon, in milliseconds.
    pub retention_ms: i64,
    /// Retention sweeper cadence.
    pub sweep_cadence: Duration,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LEASE_ARBITER_TABLE` | *(required)* |
    /// | `LEASE_ARBITER_CONSTANTS_TABLE` | *(required)* |
    /// | `LEASE_ARBITER_EPSILON_MS` | `5000` |
    /// | `LEASE_ARBITER_LINGER_MS` | `60000` |
    /// | `LEASE_ARBITER_RETENTION_MS` | `2592000000` (30 days) |
    /// | `LEASE_ARBITER_SWEEP_CADENCE_SECS` | `14400` (4 hours) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let lease_table = env("LEASE_ARBITER_TABLE").map_err(|_| ConfigError::MissingTable)?;
        let constants_table = env("LEASE_ARBITER_CONSTANTS_TABLE")
            .map_err(|_| ConfigError::MissingConstantsTable)?;

        let epsilon_ms = env("LEASE_ARBITER_EPSILON_MS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_EPSILON_MS);

        let linger_ms = env("LEASE_ARBITER_LINGER_MS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_LINGER_MS);

        let retention_ms = env("LEASE_ARBITER_RETENTION_MS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_RETENTION_MS);

        let sweep_cadence_secs = env("LEASE_ARBITER_SWEEP_CADENCE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SWEEP_CADENCE_SECS);

        let config = Self {
            lease_table,
            constants_table,
            epsilon_ms,
            linger_ms,
            retention_ms,
            sweep_cadence: Duration::from_secs(sweep_cadence_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate identifier safety and the epsilon ≪ linger ≪ retention ordering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.lease_table)?;
        validate_identifier(&self.constants_table)?;

        if self.epsilon_ms >= self.linger_ms {
            return Err(ConfigError::EpsilonNotBelowLinger {
                epsilon_ms: self.epsilon_ms,
                linger_ms: self.linger_ms,
            });
        }
        if self.linger_ms >= self.retention_ms {
            return Err(ConfigError::LingerNotBelowRetention {
                linger_ms: self.linger_ms,
                retention_ms: self.retention_ms,
            });
        }

        Ok(())
    }
}

/// Table names are interpolated directly into DDL/DML (Postgres cannot bind
/// identifiers as parameters), so they must be restricted to a safe charset
/// before being used anywhere near a query string.
fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if name.is_empty() || !starts_ok || !rest_ok {
        return Err(ConfigError::InvalidIdentifier(name.to_owned()));
    }
    Ok(())
}
