// Lock settings, loadable from a JSON file

use crate::error::{LockError, Result};
use blobstore::{MAX_LEASE_DURATION, MIN_LEASE_DURATION};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How many times, and how often, to retry a contended acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            retry_interval,
        }
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Longest time an acquisition can spend sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.retry_interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Requested lease lifetime in seconds
    pub lease_duration_secs: u64,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    /// How long before expiry a background renewal fires
    pub renew_margin_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: MIN_LEASE_DURATION.as_secs(),
            max_attempts: 10,
            retry_interval_ms: 1000,
            renew_margin_secs: 5,
        }
    }
}

impl LockConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let requested = self.lease_duration();
        if requested < MIN_LEASE_DURATION || requested > MAX_LEASE_DURATION {
            return Err(LockError::Configuration {
                requested,
                min: MIN_LEASE_DURATION,
                max: MAX_LEASE_DURATION,
            });
        }
        if self.renew_margin_secs == 0 || self.renew_margin_secs >= self.lease_duration_secs {
            return Err(LockError::KeepAlivePeriod {
                period: self.keep_alive_period(),
                lease_duration: requested,
            });
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_interval_ms),
        )
    }

    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.saturating_sub(self.renew_margin_secs))
    }
}
