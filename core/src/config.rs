//! Dispatch configuration.
//!
//! Loaded once at startup from JSON or the environment, then turned into a
//! `PolicyTable` by the registry builder. Every field has a default so an
//! empty object is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policy::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
}

impl DispatchConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
    pub const UPLOAD_TIMEOUT_MS: u64 = 40_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        check_multiplier("backoff_multiplier", config.backoff_multiplier)?;
        Ok(config)
    }

    /// Start from the defaults and apply any `COURIER_*` variables present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = lookup("COURIER_DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = parse_var("COURIER_DEFAULT_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("COURIER_UPLOAD_TIMEOUT_MS") {
            config.upload_timeout_ms = parse_var("COURIER_UPLOAD_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("COURIER_MAX_RETRIES") {
            config.max_retries = parse_var("COURIER_MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("COURIER_BACKOFF_MULTIPLIER") {
            config.backoff_multiplier = parse_var("COURIER_BACKOFF_MULTIPLIER", v)?;
            check_multiplier("COURIER_BACKOFF_MULTIPLIER", config.backoff_multiplier)?;
        }
        Ok(config)
    }

    pub fn default_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.default_timeout_ms),
            self.max_retries,
            self.backoff_multiplier,
        )
    }

    pub fn upload_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.upload_timeout_ms),
            self.max_retries,
            self.backoff_multiplier,
        )
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            upload_timeout_ms: Self::UPLOAD_TIMEOUT_MS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            backoff_multiplier: Self::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidVar { key, value })
}

/// The multiplier must be finite and at least 1.0.
fn check_multiplier(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidVar {
            key,
            value: value.to_string(),
        })
    }
}
