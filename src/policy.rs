//! Pacing policies for the watch loops
//!
//! `BackoffPolicy` decides how long to wait after failed fetches and
//! `FreshnessPolicy` decides when a polling watch should fetch again.
//! Both are stateless: the loops keep the failure count and pass it in.

use crate::config::{BackoffConfig, FreshnessConfig};
use rand::Rng;
use std::time::Duration;

/// Exponential failure backoff with an upper bound and jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    grace_failures: u32,
    jitter_divisor: u32,
}

impl BackoffPolicy {
    /// Build a policy from its config
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            grace_failures: config.grace_failures,
            jitter_divisor: config.jitter_divisor,
        }
    }

    /// Deterministic part of the wait for `failures` consecutive failures
    ///
    /// Zero up to the grace count, then `base_delay` doubling per failure,
    /// capped at `max_delay`. Never decreases as `failures` grows.
    pub fn base_wait(&self, failures: u32) -> Duration {
        if failures <= self.grace_failures {
            return Duration::ZERO;
        }
        let exponent = failures - self.grace_failures - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |wait| wait.min(self.max_delay))
    }

    /// Wait before the next attempt, including jitter
    pub fn wait(&self, failures: u32) -> Duration {
        let base = self.base_wait(failures);
        if base.is_zero() || self.jitter_divisor == 0 {
            return base;
        }
        base + random_stagger(base / self.jitter_divisor)
    }

    /// Largest value `wait` can return for `failures`
    pub fn max_wait(&self, failures: u32) -> Duration {
        let base = self.base_wait(failures);
        if self.jitter_divisor == 0 {
            return base;
        }
        base + base / self.jitter_divisor
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

/// Poll scheduling for polling-only types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    jitter_divisor: u32,
}

impl FreshnessPolicy {
    /// Build a policy from its config
    pub fn new(config: &FreshnessConfig) -> Self {
        Self {
            jitter_divisor: config.jitter_divisor,
        }
    }

    /// Time until data that is already `age` old exceeds `max_age`
    ///
    /// Zero when the data is already too stale.
    pub fn base_wait(&self, max_age: Duration, age: Duration) -> Duration {
        max_age.saturating_sub(age)
    }

    /// Wait before the next poll, including jitter
    ///
    /// The jitter makes it very likely that the cached value is stale by
    /// the time the watch wakes, so the next fetch refreshes it instead of
    /// returning the same entry again.
    pub fn wait(&self, max_age: Duration, age: Duration) -> Duration {
        let base = self.base_wait(max_age, age);
        if self.jitter_divisor == 0 {
            return base;
        }
        base + random_stagger(max_age / self.jitter_divisor)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(&FreshnessConfig::default())
    }
}

/// Uniformly random duration in `[0, intv)`
pub fn random_stagger(intv: Duration) -> Duration {
    let nanos = u64::try_from(intv.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
}
