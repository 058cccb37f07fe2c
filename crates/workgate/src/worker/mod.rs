//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed set of worker threads consuming a bounded queue
//! - [`HandlerRegistry`] - Kind tag → handler routing
//! - [`ResultStream`] / [`ResultPool`] - Non-blocking result delivery with reusable storage
//! - [`PoolState`] - Shutdown lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit   ┌────────────────────┐
//! │   Producer   │ ────────▶ │  bounded queue (C) │
//! │ (TokenBucket)│           └─────────┬──────────┘
//! └──────────────┘                     │ select(task, shutdown)
//!                                      ▼
//!            ┌────────────────────────────────────────────┐
//!            │ Worker 0 │ Worker 1 │ ... │ Worker N-1     │
//!            │   registry.dispatch(kind) → TaskResult     │
//!            └─────────┬──────────────────────┬───────────┘
//!                      │ try_send             │ atomics
//!                      ▼                      ▼
//!              ┌───────────────┐        ┌──────────┐
//!              │ ResultStream  │        │  Stats   │
//!              └───────────────┘        └──────────┘
//! ```
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] closes intake, then signals the workers. Each worker
//! processes whatever is still queued and exits. The caller waits until all
//! workers are gone or the deadline passes, whichever comes first.

mod pool;
mod registry;
mod results;
mod shutdown;

pub use pool::{SubmitError, WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use registry::{
    Handler, HandlerError, HandlerRegistry, HandlerResult, TaskContext, TaskError,
};
pub use results::{PooledResult, ResultPool, ResultPoolStats, ResultStream, TaskResult};
pub use shutdown::{PoolState, ShutdownError};
