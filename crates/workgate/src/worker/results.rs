//! Result delivery
//!
//! Workers fill a [`TaskResult`] drawn from a [`ResultPool`] and hand it to
//! consumers by value through a bounded channel. Consumers read it from a
//! [`ResultStream`] and may give it back with [`ResultStream::recycle`], which
//! keeps the string and map allocations for the next task.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use super::registry::TaskError;
use crate::config::duration_millis;
use crate::task::Metadata;

/// Outcome of one processed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub kind: String,
    pub worker_id: usize,
    pub success: bool,
    pub error: Option<TaskError>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub metadata: Metadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Overwrite every field for a new task, keeping allocations.
    pub fn reset(&mut self, task_id: &str, kind: &str, worker_id: usize, metadata: Metadata) {
        self.task_id.clear();
        self.task_id.push_str(task_id);
        self.kind.clear();
        self.kind.push_str(kind);
        self.worker_id = worker_id;
        self.success = false;
        self.error = None;
        self.duration = Duration::ZERO;
        self.metadata.clear();
        self.metadata.extend(metadata);
        self.started_at = Utc::now();
        self.completed_at = self.started_at;
    }
}

/// Bounded free list of result objects
#[derive(Debug)]
pub struct ResultPool {
    free: ArrayQueue<TaskResult>,
    created: AtomicU64,
    reused: AtomicU64,
}

/// Allocation counters of a [`ResultPool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPoolStats {
    /// Results allocated because the free list was empty
    pub created: u64,
    /// Checkouts served from the free list
    pub reused: u64,
    /// Results currently parked in the free list
    pub available: usize,
}

impl ResultPool {
    /// Create a pool that parks at most `capacity` idle results.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Borrow a result. The slot goes back to the pool when the guard drops
    /// unless it was [`detach`](PooledResult::detach)ed.
    pub fn checkout(&self) -> PooledResult<'_> {
        let result = match self.free.pop() {
            Some(result) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                result
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                TaskResult::default()
            }
        };
        PooledResult {
            pool: self,
            result,
            detached: false,
        }
    }

    /// Park a result for reuse. Discarded when the free list is full.
    pub fn release(&self, result: TaskResult) {
        let _ = self.free.push(result);
    }

    pub fn stats(&self) -> ResultPoolStats {
        ResultPoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            available: self.free.len(),
        }
    }
}

/// Checked-out result; returns itself to the pool on drop
#[derive(Debug)]
pub struct PooledResult<'a> {
    pool: &'a ResultPool,
    result: TaskResult,
    detached: bool,
}

impl PooledResult<'_> {
    /// Take ownership of the result; it will not be returned on drop.
    pub fn detach(mut self) -> TaskResult {
        self.detached = true;
        std::mem::take(&mut self.result)
    }
}

impl Deref for PooledResult<'_> {
    type Target = TaskResult;

    fn deref(&self) -> &TaskResult {
        &self.result
    }
}

impl DerefMut for PooledResult<'_> {
    fn deref_mut(&mut self) -> &mut TaskResult {
        &mut self.result
    }
}

impl Drop for PooledResult<'_> {
    fn drop(&mut self) {
        if !self.detached {
            self.pool.release(std::mem::take(&mut self.result));
        }
    }
}

/// Consumer side of a pool's result channel
///
/// Cloning yields another handle on the same channel; each result is delivered
/// to exactly one handle. The stream ends once every worker has exited and the
/// buffered results have been read.
#[derive(Debug, Clone)]
pub struct ResultStream {
    rx: Receiver<TaskResult>,
    pool: Arc<ResultPool>,
}

impl ResultStream {
    pub(crate) fn new(rx: Receiver<TaskResult>, pool: Arc<ResultPool>) -> Self {
        Self { rx, pool }
    }

    /// Next result if one is ready
    pub fn try_recv(&self) -> Option<TaskResult> {
        self.rx.try_recv().ok()
    }

    /// Block for the next result; `None` once the stream has ended
    pub fn recv(&self) -> Option<TaskResult> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next result
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All results buffered right now
    pub fn drain(&self) -> Vec<TaskResult> {
        self.rx.try_iter().collect()
    }

    /// Blocking iterator that ends with the stream
    pub fn iter(&self) -> impl Iterator<Item = TaskResult> + '_ {
        self.rx.iter()
    }

    /// Results waiting in the channel
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Give a consumed result back for reuse
    pub fn recycle(&self, result: TaskResult) {
        self.pool.release(result);
    }
}

impl<'a> IntoIterator for &'a ResultStream {
    type Item = TaskResult;
    type IntoIter = crossbeam::channel::Iter<'a, TaskResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}
