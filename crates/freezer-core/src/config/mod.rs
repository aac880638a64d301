//! Configuration parsing and management.
//!
//! The configuration file is TOML:
//!
//! ```toml
//! [database]
//! path = "/var/lib/freezer/freezer.db"
//!
//! [log]
//! level = "info"
//!
//! [account_freeze]
//! billing_warn_grace_period = "15days"
//! billing_freeze_grace_period = "60days"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezerConfig {
    /// Store location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging.
    #[serde(default)]
    pub log: LogConfig,

    /// Freeze grace periods.
    #[serde(default)]
    pub account_freeze: FreezeConfig,
}

impl FreezerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.account_freeze.validate()?;
        if self.log.level.trim().is_empty() {
            return Err(ConfigError::Validation("log.level must not be empty".into()));
        }
        Ok(())
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("freezer.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default `tracing` filter directive, e.g. `info` or
    /// `freezer_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Grace periods granted before a billing event escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeConfig {
    /// Time between a billing warning and the billing freeze.
    #[serde(
        default = "default_billing_warn_grace_period",
        with = "humantime_serde"
    )]
    pub billing_warn_grace_period: Duration,

    /// Time between a billing freeze and pending deletion.
    #[serde(
        default = "default_billing_freeze_grace_period",
        with = "humantime_serde"
    )]
    pub billing_freeze_grace_period: Duration,
}

const fn default_billing_warn_grace_period() -> Duration {
    Duration::from_secs(360 * 60 * 60)
}

const fn default_billing_freeze_grace_period() -> Duration {
    Duration::from_secs(1440 * 60 * 60)
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            billing_warn_grace_period: default_billing_warn_grace_period(),
            billing_freeze_grace_period: default_billing_freeze_grace_period(),
        }
    }
}

impl FreezeConfig {
    /// The billing warning grace period in whole days.
    #[must_use]
    pub fn billing_warn_grace_days(&self) -> i64 {
        whole_days(self.billing_warn_grace_period)
    }

    /// The billing freeze grace period in whole days.
    #[must_use]
    pub fn billing_freeze_grace_days(&self) -> i64 {
        whole_days(self.billing_freeze_grace_period)
    }

    /// Checks that both grace periods are at least one day.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a shorter period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, period) in [
            ("billing_warn_grace_period", self.billing_warn_grace_period),
            ("billing_freeze_grace_period", self.billing_freeze_grace_period),
        ] {
            if period.as_secs() < SECONDS_PER_DAY {
                return Err(ConfigError::Validation(format!(
                    "account_freeze.{name} must be at least one day, got {}",
                    humantime::format_duration(period)
                )));
            }
        }
        Ok(())
    }
}

fn whole_days(period: Duration) -> i64 {
    i64::try_from(period.as_secs() / SECONDS_PER_DAY).unwrap_or(i64::MAX)
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
