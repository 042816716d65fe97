//! Per-kind timeout and retry policies.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::http::RequestKind;

/// Timeout and retry settings attached to every adapted request.
///
/// The transport applies these; the registry only selects them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Factor applied to `timeout` after each failed attempt.
    pub backoff_multiplier: f32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32, backoff_multiplier: f32) -> Self {
        Self {
            timeout,
            max_retries,
            backoff_multiplier,
        }
    }

    /// Timeout for the given zero-based attempt. Saturates at `Duration::MAX`.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(exponent);
        if factor == 1.0 || self.timeout.is_zero() {
            return self.timeout;
        }
        let nanos = self.timeout.as_nanos() as f64 * factor;
        if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::MAX
        }
    }

    /// Total number of attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DispatchConfig::DEFAULT_TIMEOUT_MS),
            DispatchConfig::DEFAULT_MAX_RETRIES,
            DispatchConfig::DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

/// Policy lookup by request kind: an explicit override if one was set,
/// otherwise the default policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    default: RetryPolicy,
    overrides: HashMap<RequestKind, RetryPolicy>,
}

impl PolicyTable {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        let mut table = Self::new(config.default_policy());
        table.set(RequestKind::Upload, config.upload_policy());
        table
    }

    pub fn set(&mut self, kind: RequestKind, policy: RetryPolicy) {
        self.overrides.insert(kind, policy);
    }

    pub fn set_default(&mut self, policy: RetryPolicy) {
        self.default = policy;
    }

    pub fn get(&self, kind: RequestKind) -> RetryPolicy {
        self.overrides.get(&kind).copied().unwrap_or(self.default)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}
