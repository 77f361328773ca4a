//! Configuration for the serial action queue and the expiring cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration for an [`ActionBuffer`](crate::ActionBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBufferConfig {
    /// Name of the execution thread.
    pub name: String,
    /// How long `dispose` waits for the execution thread before detaching it.
    pub shutdown_grace_ms: u64,
}

impl Default for ActionBufferConfig {
    fn default() -> Self {
        Self {
            name: "ActionBuffer".to_string(),
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ActionBufferConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution thread name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = millis(grace);
        self
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Empty`] if the name is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Empty("name"));
        }
        Ok(())
    }
}

/// Durations serialized as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_some(&super::super::millis(*value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

const fn default_cache_grace() -> Duration {
    Duration::from_secs(1)
}

/// Configuration for a [`TimedCache`](crate::TimedCache).
///
/// Durations keep full precision in memory; the JSON form carries whole
/// milliseconds (`expiration_ms`, `sweep_interval_ms`, `shutdown_grace_ms`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCacheConfig {
    /// How long an untouched entry lives.
    #[serde(rename = "expiration_ms", with = "duration_ms")]
    pub expiration: Duration,
    /// Sweep period; defaults to the expiration duration.
    #[serde(
        rename = "sweep_interval_ms",
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_ms::option"
    )]
    pub sweep_interval: Option<Duration>,
    /// How long `dispose` waits for the event thread before detaching it.
    #[serde(
        rename = "shutdown_grace_ms",
        default = "default_cache_grace",
        with = "duration_ms"
    )]
    pub shutdown_grace: Duration,
}

impl TimedCacheConfig {
    /// Configuration expiring entries after `expiration`.
    #[must_use]
    pub const fn new(expiration: Duration) -> Self {
        Self {
            expiration,
            sweep_interval: None,
            shutdown_grace: default_cache_grace(),
        }
    }

    /// Sweep every `interval` instead of once per expiration period.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set how long disposal waits for in-flight event handlers.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Expiration duration.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Effective sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.expiration)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotPositive`] for a zero duration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiration.is_zero() {
            return Err(ConfigError::NotPositive("expiration_ms"));
        }
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(ConfigError::NotPositive("sweep_interval_ms"));
        }
        Ok(())
    }

    /// Parse cache configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed input, or a validation error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
