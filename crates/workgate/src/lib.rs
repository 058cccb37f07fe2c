//! # Workgate
//!
//! A bounded-concurrency task-processing engine: a fixed pool of worker threads
//! consumes a bounded queue of typed tasks admitted through a token-bucket
//! limiter, producing per-task results and aggregate statistics, with a
//! deadline-bounded graceful shutdown.
//!
//! ## Features
//!
//! - **Admission control**: [`TokenBucket`] paces producers; blocked callers honour cancellation
//! - **Backpressure**: submission never blocks, a full queue is reported as [`SubmitError::QueueFull`]
//! - **Kind-based routing**: tasks are dispatched by their kind tag through a [`HandlerRegistry`]
//! - **Non-blocking results**: results are dropped (and reported) rather than stalling workers
//! - **Graceful shutdown**: intake closes, queued work drains, the caller waits up to a deadline
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use workgate::prelude::*;
//!
//! let registry = HandlerRegistry::<AnyTask>::new()
//!     .with_handler(IMAGE_PROCESSING, |_task, _ctx| Ok(()))
//!     .with_handler(DATA_ANALYSIS, |_task, _ctx| Err("dataset offline".into()));
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(2, 16), registry).unwrap();
//! let limiter = TokenBucket::new(LimiterConfig::new(10, Duration::from_millis(100))).unwrap();
//! let cancel = CancellationToken::new();
//!
//! limiter.acquire(&cancel).unwrap();
//! pool.submit(ImageTask::new("img_1", "https://example.com/a.jpg").into()).unwrap();
//!
//! let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
//! assert!(result.success);
//!
//! pool.shutdown(Duration::from_secs(5)).unwrap();
//! assert_eq!(pool.stats().processed, 1);
//! ```

pub mod config;
pub mod events;
pub mod limiter;
pub mod stats;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::ConfigError;
    pub use crate::events::{EventSink, MemorySink, PoolEvent, TracingSink};
    pub use crate::limiter::{AcquireError, LimiterConfig, LimiterError, TokenBucket};
    pub use crate::stats::StatsSnapshot;
    pub use crate::task::{
        AnyTask, DataTask, ImageTask, Metadata, Task, ValidationError, DATA_ANALYSIS,
        IMAGE_PROCESSING,
    };
    pub use crate::worker::{
        HandlerError, HandlerRegistry, HandlerResult, PoolState, ResultStream, ShutdownError,
        SubmitError, TaskContext, TaskError, TaskResult, WorkerPool, WorkerPoolConfig,
        WorkerPoolError,
    };
}

// Re-export key types at crate root
pub use config::ConfigError;
pub use events::{EventSink, PoolEvent, TracingSink};
pub use limiter::{AcquireError, LimiterConfig, TokenBucket};
pub use stats::{Stats, StatsSnapshot};
pub use task::{AnyTask, DataTask, ImageTask, Task, ValidationError};
pub use worker::{
    HandlerRegistry, PoolState, ShutdownError, SubmitError, TaskResult, WorkerPool,
    WorkerPoolConfig,
};
