//! Notifier and backend configuration
//!
//! All durations are stored in milliseconds so configs stay readable as
//! JSON. Every field has a default; an empty object is a valid config.

use crate::error::{NotifyError, Result};
use crate::types::TypeCapability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level notifier configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    /// Retry pacing after failed fetches
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Poll pacing after successful fetches of polling-only types
    #[serde(default)]
    pub freshness: FreshnessConfig,
}

impl NotifyConfig {
    /// Reject configurations that would busy-loop or never retry
    pub fn validate(&self) -> Result<()> {
        if self.backoff.base_delay_ms == 0 {
            return Err(NotifyError::Config(
                "backoff.baseDelayMs must be greater than 0".to_string(),
            ));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(NotifyError::Config(format!(
                "backoff.maxDelayMs ({}) must not be less than backoff.baseDelayMs ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Failure backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Wait after the first counted failure (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the wait before jitter (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Consecutive failures retried immediately before backoff starts
    #[serde(default)]
    pub grace_failures: u32,

    /// Jitter is drawn from `[0, wait / jitter_divisor)`; 0 disables it
    #[serde(default = "default_backoff_jitter_divisor")]
    pub jitter_divisor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            grace_failures: 0,
            jitter_divisor: default_backoff_jitter_divisor(),
        }
    }
}

impl BackoffConfig {
    /// Base delay as a `Duration`
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Max delay as a `Duration`
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Poll scheduling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessConfig {
    /// Jitter is drawn from `[0, max_age / jitter_divisor)`; 0 disables it
    #[serde(default = "default_freshness_jitter_divisor")]
    pub jitter_divisor: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            jitter_divisor: default_freshness_jitter_divisor(),
        }
    }
}

/// In-memory backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// How long a blocking fetch waits for a newer index (milliseconds)
    ///
    /// Overridden per request by `RequestInfo::timeout`.
    #[serde(default = "default_blocking_timeout_ms")]
    pub blocking_timeout_ms: u64,

    /// Types registered when the cache is created
    #[serde(default)]
    pub types: HashMap<String, TypeCapability>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_ms: default_blocking_timeout_ms(),
            types: HashMap::new(),
        }
    }
}

impl MemoryConfig {
    /// Blocking timeout as a `Duration`
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }

    /// Pre-register a type
    pub fn with_type(mut self, type_id: impl Into<String>, capability: TypeCapability) -> Self {
        self.types.insert(type_id.into(), capability);
        self
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_jitter_divisor() -> u32 {
    4
}

fn default_freshness_jitter_divisor() -> u32 {
    16
}

fn default_blocking_timeout_ms() -> u64 {
    10 * 60 * 1_000
}
