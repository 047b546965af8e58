//! Retry policy for mail that failed unexpectedly while being processed.
//!
//! Failures that escape the pipeline (a panicking mailet, a repository outage)
//! put the mail back on the queue after an exponentially growing, jittered
//! delay. Once the attempt budget is spent the spool manager dead-letters it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with jitter
///
/// `delay = min(base * 2^(attempt - 1), max) * (1 ± jitter)`, where `attempt`
/// is 1-indexed.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter_factor: f64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_ms
    } else {
        base_ms.saturating_mul(1u64 << exponent).min(max_ms)
    };

    let jitter_range = (delay as f64) * jitter_factor.clamp(0.0, 1.0);
    let jittered = if jitter_range > 0.0 {
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    } else {
        delay
    };

    Duration::from_millis(jittered)
}

/// How often, and how far apart, a failing mail is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before the mail is dead-lettered.
    ///
    /// Default: 5
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    ///
    /// Default: 1000
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    ///
    /// Default: 300000 (5 minutes)
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delays are randomised within ±`jitter_factor`.
    ///
    /// Default: 0.1
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether a mail that has failed `attempts` times may be tried again
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retrying a mail that has already failed `attempts` times
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        calculate_backoff(
            attempts.saturating_add(1),
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
        )
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_delay_ms() -> u64 {
        300_000
    }

    pub const fn jitter_factor() -> f64 {
        0.1
    }
}
