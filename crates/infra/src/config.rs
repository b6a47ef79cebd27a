//! Engine configuration loaded from the process environment.

use chrono::Duration;
use thiserror::Error;

pub const RENEWAL_PERIOD_DAYS: &str = "ARMSLEDGER_RENEWAL_PERIOD_DAYS";
pub const DEFAULT_PAGE_SIZE: &str = "ARMSLEDGER_DEFAULT_PAGE_SIZE";
pub const MAX_PAGE_SIZE: &str = "ARMSLEDGER_MAX_PAGE_SIZE";
pub const ALLOW_REMOVE_WITH_OPEN_DISTRIBUTIONS: &str =
    "ARMSLEDGER_ALLOW_REMOVE_WITH_OPEN_DISTRIBUTIONS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Days between issue and the first renewal due date.
    pub renewal_period_days: i64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Allow deleting an armory while distributions against it are outstanding.
    pub allow_remove_with_open_distributions: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            renewal_period_days: 30,
            default_page_size: 20,
            max_page_size: 100,
            allow_remove_with_open_distributions: false,
        }
    }
}

impl LedgerConfig {
    /// Read overrides from `std::env`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable lookup (tests, embedded callers).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(RENEWAL_PERIOD_DAYS) {
            let days: i64 = parse(RENEWAL_PERIOD_DAYS, &raw)?;
            if days <= 0 {
                return Err(invalid(RENEWAL_PERIOD_DAYS, &raw, "must be positive"));
            }
            config.renewal_period_days = days;
        }
        if let Some(raw) = lookup(DEFAULT_PAGE_SIZE) {
            config.default_page_size = parse(DEFAULT_PAGE_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(MAX_PAGE_SIZE) {
            config.max_page_size = parse(MAX_PAGE_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ALLOW_REMOVE_WITH_OPEN_DISTRIBUTIONS) {
            config.allow_remove_with_open_distributions =
                parse(ALLOW_REMOVE_WITH_OPEN_DISTRIBUTIONS, &raw)?;
        }

        if config.max_page_size == 0 {
            return Err(invalid(
                MAX_PAGE_SIZE,
                &config.max_page_size.to_string(),
                "must be positive",
            ));
        }
        if config.default_page_size == 0 || config.default_page_size > config.max_page_size {
            return Err(invalid(
                DEFAULT_PAGE_SIZE,
                &config.default_page_size.to_string(),
                "must be between 1 and the max page size",
            ));
        }

        Ok(config)
    }

    pub fn renewal_period(&self) -> Duration {
        Duration::days(self.renewal_period_days)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
