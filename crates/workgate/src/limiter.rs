//! Token-bucket admission limiter
//!
//! A bucket holds up to `max_tokens` permits. A background thread adds one permit
//! per refill tick and wakes a single waiter. [`TokenBucket::acquire`] blocks the
//! calling thread until a permit is available or the supplied cancellation token
//! fires.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use workgate::limiter::{LimiterConfig, TokenBucket};
//!
//! let config = LimiterConfig::new(10, Duration::from_millis(100));
//! let bucket = TokenBucket::new(config).unwrap();
//!
//! let cancel = CancellationToken::new();
//! bucket.acquire(&cancel).unwrap();
//! assert_eq!(bucket.tokens(), 9);
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{duration_millis, env_millis, env_parse, saturating_millis, ConfigError};

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Bucket capacity
    pub max_tokens: u32,

    /// Interval between single-token refills
    #[serde(with = "duration_millis")]
    pub refill_interval: Duration,

    /// Tokens available at construction (defaults to `max_tokens`)
    #[serde(default)]
    pub initial_tokens: Option<u32>,

    /// Upper bound on how long a blocked `acquire` goes without re-checking cancellation
    #[serde(with = "duration_millis")]
    pub cancel_poll_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_interval: Duration::from_millis(100),
            initial_tokens: None,
            cancel_poll_interval: Duration::from_millis(5),
        }
    }
}

impl LimiterConfig {
    /// Create a new limiter configuration
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            max_tokens,
            refill_interval,
            ..Default::default()
        }
    }

    /// Set the number of tokens available at construction
    pub fn with_initial_tokens(mut self, tokens: u32) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }

    /// Set the cancellation re-check interval for blocked callers
    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    /// Create configuration from environment variables
    ///
    /// - `WORKGATE_MAX_TOKENS`
    /// - `WORKGATE_REFILL_INTERVAL_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_tokens: env_parse("WORKGATE_MAX_TOKENS")?.unwrap_or(defaults.max_tokens),
            refill_interval: env_millis("WORKGATE_REFILL_INTERVAL_MS")?
                .unwrap_or(defaults.refill_interval),
            ..defaults
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("max_tokens", "must be at least 1"));
        }
        if self.refill_interval.is_zero() {
            return Err(ConfigError::invalid(
                "refill_interval",
                "must be greater than zero",
            ));
        }
        if self.cancel_poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "cancel_poll_interval",
                "must be greater than zero",
            ));
        }
        if let Some(initial) = self.initial_tokens {
            if initial > self.max_tokens {
                return Err(ConfigError::invalid(
                    "initial_tokens",
                    format!("{initial} exceeds max_tokens {}", self.max_tokens),
                ));
            }
        }
        Ok(())
    }
}

/// Errors returned by [`TokenBucket::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The cancellation token fired before a permit was issued
    #[error("acquire cancelled")]
    Cancelled,
}

/// Limiter construction errors
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The refill thread could not be spawned
    #[error("failed to spawn refill thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug)]
struct BucketShared {
    state: Mutex<BucketState>,
    available: Condvar,
    max_tokens: u32,
    cancel_poll_interval: Duration,
}

impl BucketShared {
    /// One refill tick: at most one token, at most one wake-up.
    fn refill(&self) -> bool {
        let mut state = self.state.lock();
        state.last_refill = Instant::now();
        if state.tokens < self.max_tokens {
            state.tokens += 1;
            self.available.notify_one();
            true
        } else {
            false
        }
    }
}

/// Token-bucket rate limiter with a background refill thread
///
/// Dropping the bucket stops and joins the refill thread.
#[derive(Debug)]
pub struct TokenBucket {
    shared: Arc<BucketShared>,
    refill_interval: Duration,
    stop_tx: Option<Sender<()>>,
    refill_handle: Option<JoinHandle<()>>,
}

impl TokenBucket {
    /// Create a bucket and start its refill thread
    pub fn new(config: LimiterConfig) -> Result<Self, LimiterError> {
        config.validate()?;

        let shared = Arc::new(BucketShared {
            state: Mutex::new(BucketState {
                tokens: config.initial_tokens.unwrap_or(config.max_tokens),
                last_refill: Instant::now(),
            }),
            available: Condvar::new(),
            max_tokens: config.max_tokens,
            cancel_poll_interval: config.cancel_poll_interval,
        });

        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let refill_shared = Arc::clone(&shared);
        let interval = config.refill_interval;
        let handle = thread::Builder::new()
            .name("workgate-refill".to_string())
            .spawn(move || refill_loop(refill_shared, interval, stop_rx))?;

        debug!(
            max_tokens = config.max_tokens,
            refill_interval_ms = saturating_millis(interval),
            "Token bucket started"
        );

        Ok(Self {
            shared,
            refill_interval: interval,
            stop_tx: Some(stop_tx),
            refill_handle: Some(handle),
        })
    }

    /// Block until a token is available or `cancel` fires.
    ///
    /// A cancelled call never consumes a token.
    pub fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let mut state = self.shared.state.lock();
        loop {
            if cancel.is_cancelled() {
                // We may have absorbed the wake-up meant for another waiter.
                if state.tokens > 0 {
                    self.shared.available.notify_one();
                }
                return Err(AcquireError::Cancelled);
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return Ok(());
            }

            self.shared
                .available
                .wait_for(&mut state, self.shared.cancel_poll_interval);
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Apply one refill tick immediately. Returns whether a token was added.
    pub fn refill_once(&self) -> bool {
        self.shared.refill()
    }

    /// Tokens currently available
    pub fn tokens(&self) -> u32 {
        self.shared.state.lock().tokens
    }

    /// Bucket capacity
    pub fn max_tokens(&self) -> u32 {
        self.shared.max_tokens
    }

    /// Interval between refill ticks
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// When the last refill tick ran (construction time if none yet)
    pub fn last_refill(&self) -> Instant {
        self.shared.state.lock().last_refill
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        // Disconnecting the stop channel ends the refill loop.
        self.stop_tx.take();
        if let Some(handle) = self.refill_handle.take() {
            if handle.join().is_err() {
                warn!("Refill thread panicked");
            }
        }
    }
}

fn refill_loop(shared: Arc<BucketShared>, interval: Duration, stop_rx: Receiver<()>) {
    let ticker = channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                shared.refill();
            }
            recv(stop_rx) -> _ => break,
        }
    }
    debug!("Refill loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bucket whose background thread will not tick during a test
    fn manual_bucket(max: u32, initial: u32) -> TokenBucket {
        let config = LimiterConfig::new(max, Duration::from_secs(3600)).with_initial_tokens(initial);
        TokenBucket::new(config).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = LimiterConfig::default();
        assert_eq!(config.max_tokens, 10);
        assert_eq!(config.refill_interval, Duration::from_millis(100));
        assert!(config.initial_tokens.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(LimiterConfig::new(0, Duration::from_millis(10))
            .validate()
            .is_err());
        assert!(LimiterConfig::new(1, Duration::ZERO).validate().is_err());
        assert!(LimiterConfig::new(2, Duration::from_millis(10))
            .with_initial_tokens(3)
            .validate()
            .is_err());
        assert!(LimiterConfig::new(1, Duration::from_millis(10))
            .with_cancel_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = LimiterConfig::new(4, Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["refill_interval"], 250);
        let parsed: LimiterConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = TokenBucket::new(LimiterConfig::new(0, Duration::from_millis(1))).unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));
    }

    #[test]
    fn test_starts_full_by_default() {
        let bucket = TokenBucket::new(LimiterConfig::new(5, Duration::from_secs(3600))).unwrap();
        assert_eq!(bucket.tokens(), 5);
        assert_eq!(bucket.max_tokens(), 5);
    }

    #[test]
    fn test_refill_ticks_add_one_token_each() {
        let bucket = manual_bucket(5, 1);
        for k in 1..=8u32 {
            bucket.refill_once();
            assert_eq!(bucket.tokens(), 5.min(1 + k));
        }
    }

    #[test]
    fn test_refill_never_exceeds_max() {
        let bucket = manual_bucket(3, 3);
        assert!(!bucket.refill_once());
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn test_try_acquire_stops_at_zero() {
        let bucket = manual_bucket(2, 2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_acquire_decrements() {
        let bucket = manual_bucket(3, 3);
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).unwrap();
        bucket.acquire(&cancel).unwrap();
        assert_eq!(bucket.tokens(), 1);
    }

    #[test]
    fn test_cancelled_acquire_never_takes_token() {
        let bucket = manual_bucket(3, 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(bucket.acquire(&cancel), Err(AcquireError::Cancelled));
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn test_blocked_acquire_wakes_on_refill() {
        let bucket = Arc::new(manual_bucket(1, 0));
        let cancel = CancellationToken::new();

        let waiter = {
            let bucket = Arc::clone(&bucket);
            let cancel = cancel.clone();
            thread::spawn(move || bucket.acquire(&cancel))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        bucket.refill_once();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_blocked_acquire_observes_cancellation() {
        let bucket = Arc::new(manual_bucket(1, 0));
        let cancel = CancellationToken::new();

        let waiter = {
            let bucket = Arc::clone(&bucket);
            let cancel = cancel.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (bucket.acquire(&cancel), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();

        let (result, _) = waiter.join().unwrap();
        assert_eq!(result, Err(AcquireError::Cancelled));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_background_refill() {
        let config = LimiterConfig::new(2, Duration::from_millis(10)).with_initial_tokens(0);
        let bucket = TokenBucket::new(config).unwrap();
        let cancel = CancellationToken::new();

        let started = Instant::now();
        bucket.acquire(&cancel).unwrap();
        bucket.acquire(&cancel).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(15));
        assert!(bucket.last_refill() > started);
    }

    #[test]
    fn test_concurrent_acquirers_never_overdraw() {
        let bucket = Arc::new(manual_bucket(4, 4));
        let cancel = CancellationToken::new();
        let issued = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let cancel = cancel.clone();
                let issued = Arc::clone(&issued);
                thread::spawn(move || {
                    if bucket.acquire(&cancel).is_ok() {
                        issued.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(issued.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(bucket.tokens(), 0);

        cancel.cancel();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(issued.load(std::sync::atomic::Ordering::SeqCst), 4);
    }
}
