//! Process configuration
//!
//! Pool and limiter settings come from the library's own `from_env`; the
//! demo-specific intervals are read here.

use std::time::Duration;

use anyhow::{Context, Result};
use workgate::limiter::LimiterConfig;
use workgate::worker::WorkerPoolConfig;

/// Everything the worker process needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pool: WorkerPoolConfig,
    pub limiter: LimiterConfig,
    /// Interval between generated tasks
    pub produce_interval: Duration,
    /// Interval between stats reports
    pub stats_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default().with_name("workgate-worker"),
            limiter: LimiterConfig::default(),
            produce_interval: Duration::from_millis(500),
            stats_interval: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    ///
    /// In addition to the `WORKGATE_*` pool and limiter variables:
    /// - `WORKGATE_PRODUCE_INTERVAL_MS`
    /// - `WORKGATE_STATS_INTERVAL_MS`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mut pool = WorkerPoolConfig::from_env().context("Invalid worker pool configuration")?;
        if std::env::var("WORKGATE_POOL_NAME").is_err() {
            pool.name = defaults.pool.name;
        }
        pool.validate().context("Invalid worker pool configuration")?;

        let limiter = LimiterConfig::from_env().context("Invalid rate limiter configuration")?;
        limiter
            .validate()
            .context("Invalid rate limiter configuration")?;

        Ok(Self {
            pool,
            limiter,
            produce_interval: env_millis("WORKGATE_PRODUCE_INTERVAL_MS")?
                .unwrap_or(defaults.produce_interval),
            stats_interval: env_millis("WORKGATE_STATS_INTERVAL_MS")?
                .unwrap_or(defaults.stats_interval),
        })
    }
}

fn env_millis(var: &str) -> Result<Option<Duration>> {
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    let millis: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{var} must be a number of milliseconds, got {value:?}"))?;
    anyhow::ensure!(millis > 0, "{var} must be greater than zero");
    Ok(Some(Duration::from_millis(millis)))
}
