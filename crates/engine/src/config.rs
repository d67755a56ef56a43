//! Engine configuration
//!
//! Lease, heartbeat and monitor timings plus worker pool capacity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum recommended ratio between lease duration and heartbeat period
pub const RECOMMENDED_LEASE_RATIO: u32 = 3;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A heartbeat period that reaches the lease duration guarantees false expiries
    #[error(
        "heartbeat period ({heartbeat:?}) must be strictly smaller than lease duration ({lease:?})"
    )]
    HeartbeatNotBelowLease { heartbeat: Duration, lease: Duration },

    /// A timing option was zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Pool capacity was zero
    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Engine configuration
///
/// # Example
///
/// ```
/// use leasekeep_engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_lease_duration(Duration::from_secs(30))
///     .with_heartbeat_period(Duration::from_secs(5))
///     .with_max_workers(8);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long an attempt stays alive without a heartbeat
    #[serde(with = "duration_millis")]
    pub lease_duration: Duration,

    /// How often a running attempt refreshes its heartbeat
    #[serde(with = "duration_millis")]
    pub heartbeat_period: Duration,

    /// How often the lease monitor scans the task registry
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Maximum number of units of work executing at once
    pub max_workers: usize,

    /// Upper bound for draining the pool on shutdown (`None` waits indefinitely)
    #[serde(default, with = "option_duration_millis")]
    pub shutdown_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10),
            heartbeat_period: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(10),
            max_workers: 4,
            shutdown_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional, defaults from [`EngineConfig::default`]):
    /// - `LEASE_DURATION_SECONDS`
    /// - `HEARTBEAT_PERIOD_SECONDS`
    /// - `MONITOR_INTERVAL_SECONDS`
    /// - `MAX_WORKERS`
    /// - `SHUTDOWN_TIMEOUT_SECONDS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .map(Some)
                    .ok_or(ConfigError::InvalidEnv { name, value }),
            }
        };

        let defaults = Self::default();
        let max_workers = match lookup("MAX_WORKERS") {
            None => defaults.max_workers,
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: "MAX_WORKERS",
                    value,
                })?,
        };

        let config = Self {
            lease_duration: seconds("LEASE_DURATION_SECONDS")?.unwrap_or(defaults.lease_duration),
            heartbeat_period: seconds("HEARTBEAT_PERIOD_SECONDS")?
                .unwrap_or(defaults.heartbeat_period),
            monitor_interval: seconds("MONITOR_INTERVAL_SECONDS")?
                .unwrap_or(defaults.monitor_interval),
            max_workers,
            shutdown_timeout: seconds("SHUTDOWN_TIMEOUT_SECONDS")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the lease duration
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set the heartbeat period
    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    /// Set the monitor scan interval
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the worker pool capacity
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Validate the configuration
    ///
    /// Rejects a heartbeat period that is not strictly below the lease duration and warns
    /// when the lease is shorter than [`RECOMMENDED_LEASE_RATIO`] heartbeat periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("lease_duration"));
        }
        if self.heartbeat_period.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat_period"));
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("monitor_interval"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.heartbeat_period >= self.lease_duration {
            return Err(ConfigError::HeartbeatNotBelowLease {
                heartbeat: self.heartbeat_period,
                lease: self.lease_duration,
            });
        }
        let recommended = self.heartbeat_period.checked_mul(RECOMMENDED_LEASE_RATIO);
        if recommended.map_or(true, |min| self.lease_duration < min) {
            warn!(
                lease = ?self.lease_duration,
                heartbeat = ?self.heartbeat_period,
                "lease duration is less than {}x the heartbeat period; expect spurious resubmissions",
                RECOMMENDED_LEASE_RATIO
            );
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
