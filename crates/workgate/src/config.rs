//! Shared configuration plumbing
//!
//! Pool and limiter configs live next to the components they configure
//! ([`WorkerPoolConfig`](crate::worker::WorkerPoolConfig),
//! [`LimiterConfig`](crate::limiter::LimiterConfig)). This module holds what they share:
//! the validation error type, environment parsing, and millisecond serde for durations.

use std::str::FromStr;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    /// An environment variable could not be parsed
    #[error("environment variable {var} has unparseable value {value:?}")]
    Env { var: &'static str, value: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Read and parse an environment variable. Unset yields `Ok(None)`.
pub(crate) fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
        Err(_) => Ok(None),
    }
}

/// Read an environment variable holding a millisecond count.
pub(crate) fn env_millis(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(var)?.map(Duration::from_millis))
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::saturating_millis(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
