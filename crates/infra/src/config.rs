//! Job engine configuration.
//!
//! Timeouts and reaping cadence are injected at construction; nothing here is
//! process-global.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_JOB_TIMEOUT_SECS: &str = "SVCBROKER_JOB_TIMEOUT_SECS";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "SVCBROKER_SYNC_TIMEOUT_SECS";
pub const ENV_REAP_INTERVAL_SECS: &str = "SVCBROKER_REAP_INTERVAL_SECS";
pub const ENV_REAP_AFTER_SECS: &str = "SVCBROKER_REAP_AFTER_SECS";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Timeouts and reaping for the job engine.
///
/// Durations are whole seconds when (de)serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Deadline for a provisioner call made by an asynchronous job.
    #[serde(rename = "job_timeout_secs", with = "secs")]
    pub job_timeout: Duration,
    /// Deadline for a provisioner call made on behalf of a waiting caller.
    #[serde(rename = "sync_timeout_secs", with = "secs")]
    pub sync_timeout: Duration,
    /// How often finished jobs are reaped.
    #[serde(rename = "reap_interval_secs", with = "secs")]
    pub reap_interval: Duration,
    /// How long a finished job is kept before it may be reaped.
    #[serde(rename = "reap_after_secs", with = "secs")]
    pub reap_after: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(60 * 60),
            sync_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(5 * 60),
            reap_after: Duration::from_secs(60 * 60),
        }
    }
}

impl JobsConfig {
    /// Defaults overridden by any `SVCBROKER_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`JobsConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidEnv { name, value }),
            }
        };

        let defaults = Self::default();
        let config = Self {
            job_timeout: secs(ENV_JOB_TIMEOUT_SECS, defaults.job_timeout)?,
            sync_timeout: secs(ENV_SYNC_TIMEOUT_SECS, defaults.sync_timeout)?,
            reap_interval: secs(ENV_REAP_INTERVAL_SECS, defaults.reap_interval)?,
            reap_after: secs(ENV_REAP_AFTER_SECS, defaults.reap_after)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_timeout.is_zero() {
            return Err(ConfigError::Zero("job_timeout"));
        }
        if self.sync_timeout.is_zero() {
            return Err(ConfigError::Zero("sync_timeout"));
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Zero("reap_interval"));
        }
        Ok(())
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_reap_after(mut self, after: Duration) -> Self {
        self.reap_after = after;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
