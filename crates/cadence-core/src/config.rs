//! Engine configuration.
//!
//! Defaults are deliberately conservative; every knob can be overridden
//! from the environment (`CADENCE_*` variables, durations in seconds).

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::domain::{BackoffPolicy, EngineError};
use crate::registry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size. Defaults to the host's available parallelism.
    pub concurrency: usize,

    /// Watchdog budget for tasks with no per-task override.
    pub task_timeout: Duration,

    /// Default retry count for tasks registered without an explicit policy.
    pub max_retries: u32,

    /// Base delay between retry attempts.
    pub retry_delay: Duration,

    /// Result rows older than this are eligible for purging.
    pub result_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            task_timeout: Duration::from_secs(600),
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            result_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `CADENCE_*` environment variables.
    /// A variable that is present but unparsable is an error, not a
    /// silent fallback.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Some(n) = read_var("CADENCE_CONCURRENCY")? {
            if n == 0 {
                return Err(EngineError::Config(
                    "CADENCE_CONCURRENCY must be at least 1".to_string(),
                ));
            }
            config.concurrency = n as usize;
        }
        if let Some(secs) = read_var("CADENCE_TASK_TIMEOUT")? {
            config.task_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = read_var("CADENCE_MAX_RETRIES")? {
            config.max_retries = n as u32;
        }
        if let Some(secs) = read_var("CADENCE_RETRY_DELAY")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = read_var("CADENCE_RESULT_TTL")? {
            config.result_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// The retry policy handed to tasks registered without their own.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: BackoffPolicy::exponential(self.retry_delay, false),
            timeout: None,
        }
    }
}

fn read_var(name: &str) -> Result<Option<u64>, EngineError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name}: not a number: {raw:?}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(EngineError::Config(format!("{name}: not valid unicode")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert!(config.concurrency >= 1);
        assert_eq!(config.task_timeout, Duration::from_secs(600));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.result_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn default_retry_policy_uses_exponential_backoff() {
        let policy = EngineConfig::default().default_retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff.delay_for(0), Duration::from_secs(60));
        assert_eq!(policy.backoff.delay_for(2), Duration::from_secs(240));
    }

    // Env-var overrides are not covered here: mutating the process
    // environment is unsafe in edition 2024 and races parallel tests.
    // `read_var` is exercised directly instead.

    #[test]
    fn absent_variable_reads_as_none() {
        assert_eq!(read_var("CADENCE_DOES_NOT_EXIST").unwrap(), None);
    }
}
