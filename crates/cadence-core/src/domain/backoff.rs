//! Backoff policy: decides retry delays.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest delay we will ever schedule, regardless of exponent.
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay schedule applied between retry attempts.
///
/// Exponential form: `base_delay * 2^retries_done`, where `retries_done`
/// has already been incremented for the attempt being scheduled. With
/// `jitter` the actual delay is drawn uniformly from `[0, delay]`, which
/// spreads out thundering herds of retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry (and every retry, if not exponential).
    pub base_delay: Duration,

    pub exponential: bool,

    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            exponential: true,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay, no doubling, no jitter.
    pub fn fixed(base_delay: Duration) -> Self {
        Self {
            base_delay,
            exponential: false,
            jitter: false,
        }
    }

    /// Exponential backoff from `base_delay`, optionally jittered.
    pub fn exponential(base_delay: Duration, jitter: bool) -> Self {
        Self {
            base_delay,
            exponential: true,
            jitter,
        }
    }

    /// Delay before the attempt numbered by `retries_done`.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = if self.exponential {
            base * 2f64.powi(retries_done.min(32) as i32)
        } else {
            base
        };
        let capped = raw.min(MAX_DELAY.as_secs_f64());

        if self.jitter && capped > 0.0 {
            Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=capped))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}
