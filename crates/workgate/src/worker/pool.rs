//! Worker pool
//!
//! A fixed set of OS threads consuming a bounded queue. Submission is
//! non-blocking: a full queue is reported to the caller immediately.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::registry::{HandlerRegistry, TaskContext, TaskError};
use super::results::{ResultPool, ResultPoolStats, ResultStream, TaskResult};
use super::shutdown::{PoolState, ShutdownCoordinator, ShutdownError, ShutdownSignal};
use crate::config::{duration_millis, env_millis, env_parse, saturating_millis, ConfigError};
use crate::events::{EventSink, PoolEvent, TracingSink};
use crate::stats::{Stats, StatsSnapshot};
use crate::task::{Task, ValidationError};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Pool name used in logs and events (generated if not provided)
    pub name: String,

    /// Number of worker threads
    pub workers: usize,

    /// Task queue capacity. Zero hands each task directly to an idle worker.
    pub queue_capacity: usize,

    /// Result channel capacity
    pub result_capacity: usize,

    /// Deadline used by [`WorkerPool::shutdown_default`]
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: format!("pool-{}", Uuid::now_v7()),
            workers: 5,
            queue_capacity: 100,
            result_capacity: 100,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `workers` threads and a queue of
    /// `queue_capacity`. The result channel gets the same capacity.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            result_capacity: queue_capacity.max(1),
            ..Default::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the result channel capacity
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity;
        self
    }

    /// Set the default shutdown deadline
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Create configuration from environment variables
    ///
    /// - `WORKGATE_POOL_NAME`
    /// - `WORKGATE_WORKERS`
    /// - `WORKGATE_QUEUE_CAPACITY`
    /// - `WORKGATE_RESULT_CAPACITY` (defaults to the queue capacity)
    /// - `WORKGATE_SHUTDOWN_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let queue_capacity =
            env_parse("WORKGATE_QUEUE_CAPACITY")?.unwrap_or(defaults.queue_capacity);

        Ok(Self {
            name: std::env::var("WORKGATE_POOL_NAME").unwrap_or(defaults.name),
            workers: env_parse("WORKGATE_WORKERS")?.unwrap_or(defaults.workers),
            queue_capacity,
            result_capacity: env_parse("WORKGATE_RESULT_CAPACITY")?
                .unwrap_or(queue_capacity.max(1)),
            shutdown_timeout: env_millis("WORKGATE_SHUTDOWN_TIMEOUT_MS")?
                .unwrap_or(defaults.shutdown_timeout),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.result_capacity == 0 {
            return Err(ConfigError::invalid("result_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Worker pool construction errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The task failed validation and was not queued
    #[error("task validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// The queue is at capacity
    #[error("task queue is full")]
    QueueFull,

    /// The pool is shutting down
    #[error("worker pool is shutting down")]
    PoolClosed,
}

/// State shared between the pool handle and its workers
struct Shared<T> {
    name: String,
    registry: HandlerRegistry<T>,
    stats: Stats,
    result_pool: Arc<ResultPool>,
    sink: Arc<dyn EventSink>,
    live_workers: AtomicUsize,
}

impl<T> Shared<T> {
    fn emit(&self, event: PoolEvent) {
        self.sink.emit(&event);
    }
}

/// Fixed-size pool of worker threads
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workgate::task::{AnyTask, ImageTask, IMAGE_PROCESSING};
/// use workgate::worker::{HandlerRegistry, WorkerPool, WorkerPoolConfig};
///
/// let registry = HandlerRegistry::<AnyTask>::new()
///     .with_handler(IMAGE_PROCESSING, |_task, _ctx| Ok(()));
/// let pool = WorkerPool::new(WorkerPoolConfig::new(2, 10), registry).unwrap();
///
/// pool.submit(ImageTask::new("img_1", "https://example.com/a.jpg").into()).unwrap();
/// let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
/// assert!(result.success);
///
/// pool.shutdown(Duration::from_secs(5)).unwrap();
/// ```
pub struct WorkerPool<T: Task + 'static> {
    config: WorkerPoolConfig,
    shared: Arc<Shared<T>>,
    intake: RwLock<Option<Sender<T>>>,
    // Outlives intake so the backlog stays observable while draining.
    backlog: Receiver<T>,
    results: ResultStream,
    coordinator: ShutdownCoordinator,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Task + 'static> WorkerPool<T> {
    /// Create a pool that reports events through [`TracingSink`]
    pub fn new(
        config: WorkerPoolConfig,
        registry: HandlerRegistry<T>,
    ) -> Result<Self, WorkerPoolError> {
        Self::with_sink(config, registry, Arc::new(TracingSink))
    }

    /// Create a pool with a custom event sink and start its workers
    pub fn with_sink(
        config: WorkerPoolConfig,
        registry: HandlerRegistry<T>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, WorkerPoolError> {
        config.validate()?;

        let (task_tx, task_rx) = channel::bounded(config.queue_capacity);
        let (result_tx, result_rx) = channel::bounded(config.result_capacity);
        let (coordinator, signal, done_tx) = ShutdownCoordinator::new();
        let result_pool = Arc::new(ResultPool::new(config.result_capacity));

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            registry,
            stats: Stats::new(),
            result_pool: Arc::clone(&result_pool),
            sink,
            live_workers: AtomicUsize::new(0),
        });

        info!(
            pool = %config.name,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            kinds = ?shared.registry.kinds(),
            "Starting worker pool"
        );

        let pool = Self {
            results: ResultStream::new(result_rx, result_pool),
            intake: RwLock::new(Some(task_tx)),
            backlog: task_rx.clone(),
            coordinator,
            handles: Mutex::new(Vec::with_capacity(config.workers)),
            shared,
            config,
        };

        for id in 0..pool.config.workers {
            let worker = Worker {
                id,
                shared: Arc::clone(&pool.shared),
                tasks: task_rx.clone(),
                results: result_tx.clone(),
                signal: signal.clone(),
                _done: done_tx.clone(),
            };
            pool.shared.live_workers.fetch_add(1, Ordering::SeqCst);

            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{id}", pool.config.name))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(err) => {
                    // The closure (and its worker) was dropped without running.
                    pool.shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                    // Dropping the pool stops the workers already started.
                    return Err(WorkerPoolError::Spawn(err));
                }
            }
        }

        Ok(pool)
    }

    /// Validate and enqueue a task without blocking
    #[instrument(skip(self, task), fields(pool = %self.config.name, task_id = %task.id(), kind = %task.kind()))]
    pub fn submit(&self, task: T) -> Result<(), SubmitError> {
        if let Err(err) = task.validate() {
            self.shared.emit(PoolEvent::ValidationFailed {
                pool: self.shared.name.clone(),
                task_id: task.id().to_string(),
                kind: task.kind().to_string(),
                reason: err.to_string(),
            });
            return Err(err.into());
        }

        let intake = self.intake.read();
        let Some(tx) = intake.as_ref() else {
            return Err(SubmitError::PoolClosed);
        };

        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("Task queue full");
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::PoolClosed),
        }
    }

    /// Consumer handle on the result channel
    pub fn results(&self) -> &ResultStream {
        &self.results
    }

    /// Snapshot of the processing counters
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Allocation counters of the result pool
    pub fn result_pool_stats(&self) -> ResultPoolStats {
        self.shared.result_pool.stats()
    }

    pub fn state(&self) -> PoolState {
        self.coordinator.state()
    }

    /// Workers that have not yet exited their loop
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.backlog.len()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Close intake, let workers drain and wait at most `timeout` for them.
    ///
    /// Safe to call repeatedly and from several threads; every call returns the
    /// outcome of the first. On timeout the remaining workers keep running and
    /// finish on their own.
    #[instrument(skip(self), fields(pool = %self.config.name))]
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let outcome = self.coordinator.shutdown(
            timeout,
            || {
                info!(pool = %self.config.name, "Initiating worker pool shutdown");
                self.intake.write().take();
            },
            || {
                self.shared.emit(PoolEvent::ShutdownTimedOut {
                    pool: self.shared.name.clone(),
                    timeout,
                    live_workers: self.live_workers(),
                });
            },
        );

        if outcome.is_ok() {
            for handle in self.handles.lock().drain(..) {
                if handle.join().is_err() {
                    warn!(pool = %self.config.name, "Worker thread panicked");
                }
            }
        }
        outcome
    }

    /// [`shutdown`](Self::shutdown) with the configured deadline
    pub fn shutdown_default(&self) -> Result<(), ShutdownError> {
        self.shutdown(self.config.shutdown_timeout)
    }
}

impl<T: Task + 'static> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("live_workers", &self.live_workers())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Task + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.coordinator.trigger(|| {
            self.intake.write().take();
        });
    }
}

struct Worker<T> {
    id: usize,
    shared: Arc<Shared<T>>,
    tasks: Receiver<T>,
    results: Sender<TaskResult>,
    signal: ShutdownSignal,
    // Dropped on exit; the coordinator waits for every clone to go.
    _done: Sender<()>,
}

impl<T: Task> Worker<T> {
    fn run(self) {
        self.shared.emit(PoolEvent::WorkerStarted {
            pool: self.shared.name.clone(),
            worker_id: self.id,
        });

        let wake = self.signal.wake_rx();
        loop {
            if self.signal.is_triggered() {
                self.drain();
                break;
            }

            crossbeam::select! {
                recv(self.tasks) -> task => match task {
                    Ok(task) => self.process(task),
                    Err(_) => break,
                },
                recv(wake) -> _ => {
                    self.drain();
                    break;
                }
            }
        }

        self.shared.live_workers.fetch_sub(1, Ordering::SeqCst);
        self.shared.emit(PoolEvent::WorkerStopped {
            pool: self.shared.name.clone(),
            worker_id: self.id,
        });
    }

    /// Process only what is already queued.
    fn drain(&self) {
        while let Ok(task) = self.tasks.try_recv() {
            self.process(task);
        }
    }

    fn process(&self, task: T) {
        let shared = &self.shared;
        let ctx = TaskContext::new(self.id, self.signal.token().clone());

        let mut slot = shared.result_pool.checkout();
        slot.reset(task.id(), task.kind(), self.id, task.metadata());

        let started = Instant::now();
        let outcome = shared.registry.dispatch(&task, &ctx);
        slot.duration = started.elapsed();
        slot.completed_at = Utc::now();

        shared.stats.record_processed();
        match outcome {
            Ok(()) => slot.success = true,
            Err(err) => {
                shared.stats.record_error();
                if let TaskError::UnsupportedKind(kind) = &err {
                    shared.emit(PoolEvent::UnsupportedKind {
                        pool: shared.name.clone(),
                        task_id: task.id().to_string(),
                        kind: kind.clone(),
                    });
                }
                slot.error = Some(err);
            }
        }

        let duration = slot.duration;
        let success = slot.success;

        match self.results.try_send(slot.detach()) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) => {
                shared.stats.record_dropped_result();
                shared.emit(PoolEvent::ResultDropped {
                    pool: shared.name.clone(),
                    task_id: task.id().to_string(),
                });
                shared.result_pool.release(result);
            }
            Err(TrySendError::Disconnected(result)) => {
                shared.result_pool.release(result);
            }
        }

        debug!(
            pool = %shared.name,
            worker_id = self.id,
            task_id = %task.id(),
            duration_ms = saturating_millis(duration),
            success,
            "Task processed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::task::{AnyTask, DataTask, ImageTask, IMAGE_PROCESSING};

    fn image(id: &str) -> AnyTask {
        ImageTask::new(id, "https://example.com/a.jpg").into()
    }

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.name.starts_with("pool-"));
        assert_eq!(config.workers, 5);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.result_capacity, 100);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new(2, 0)
            .with_name("imaging")
            .with_result_capacity(8)
            .with_shutdown_timeout(Duration::from_millis(500));

        assert_eq!(config.name, "imaging");
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.result_capacity, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_config_validation() {
        assert!(WorkerPoolConfig::new(0, 10).validate().is_err());
        assert!(WorkerPoolConfig::new(1, 10)
            .with_result_capacity(0)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new(1, 0).validate().is_ok());
        assert!(WorkerPoolConfig::new(1, 1).with_name(" ").validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = WorkerPoolConfig::new(3, 7).with_name("p");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["shutdown_timeout"], 30_000);
        let parsed: WorkerPoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_new_rejects_zero_workers() {
        let err = WorkerPool::new(WorkerPoolConfig::new(0, 1), HandlerRegistry::<AnyTask>::new())
            .unwrap_err();
        assert!(matches!(err, WorkerPoolError::Config(_)));
    }

    #[test]
    fn test_validation_failure_emits_event() {
        let sink = Arc::new(MemorySink::new());
        let pool = WorkerPool::with_sink(
            WorkerPoolConfig::new(1, 4),
            HandlerRegistry::<AnyTask>::new(),
            sink.clone(),
        )
        .unwrap();

        let err = pool.submit(DataTask::new("data_1", "").into()).unwrap_err();
        assert!(matches!(err, SubmitError::ValidationFailed(_)));
        assert_eq!(sink.count("validation_failed"), 1);
        assert_eq!(pool.queued(), 0);

        pool.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.stats().processed, 0);
    }

    #[test]
    fn test_processes_and_counts() {
        let registry =
            HandlerRegistry::<AnyTask>::new().with_handler(IMAGE_PROCESSING, |_, _| Ok(()));
        let pool = WorkerPool::new(WorkerPoolConfig::new(2, 8).with_name("unit"), registry)
            .unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        assert_eq!(pool.live_workers(), 2);

        for i in 0..4 {
            pool.submit(image(&format!("img_{i}"))).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(result.success);
            assert_eq!(result.kind, IMAGE_PROCESSING);
            seen.push(result.task_id.clone());
            pool.results().recycle(result);
        }
        seen.sort();
        assert_eq!(seen, vec!["img_0", "img_1", "img_2", "img_3"]);

        pool.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(
            pool.stats(),
            StatsSnapshot {
                processed: 4,
                errors: 0,
                dropped_results: 0
            }
        );
    }

    #[test]
    fn test_queue_full() {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let registry = HandlerRegistry::<AnyTask>::new().with_handler(IMAGE_PROCESSING, move |_, _| {
            let _ = release_rx.recv();
            Ok(())
        });
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 1), registry).unwrap();

        pool.submit(image("busy")).unwrap();
        // Wait for the worker to pick up the first task.
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.queued() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        pool.submit(image("queued")).unwrap();
        assert_eq!(pool.submit(image("rejected")), Err(SubmitError::QueueFull));

        drop(release_tx);
        pool.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.stats().processed, 2);
    }

    #[test]
    fn test_queued_visible_while_draining() {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let registry = HandlerRegistry::<AnyTask>::new().with_handler(IMAGE_PROCESSING, move |_, _| {
            let _ = release_rx.recv();
            Ok(())
        });
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 4), registry).unwrap();

        pool.submit(image("busy")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.queued() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.submit(image("a")).unwrap();
        pool.submit(image("b")).unwrap();

        assert!(pool.shutdown(Duration::from_millis(20)).is_err());
        assert_eq!(pool.state(), PoolState::TimedOut);
        assert_eq!(pool.queued(), 2);

        drop(release_tx);
        let results = pool.results().clone();
        let mut received = 0;
        while results.recv_timeout(Duration::from_secs(5)).is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool =
            WorkerPool::new(WorkerPoolConfig::new(1, 1), HandlerRegistry::<AnyTask>::new()).unwrap();
        pool.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.submit(image("late")), Err(SubmitError::PoolClosed));
    }

    #[test]
    fn test_drop_stops_workers() {
        let sink = Arc::new(MemorySink::new());
        let pool = WorkerPool::with_sink(
            WorkerPoolConfig::new(3, 1),
            HandlerRegistry::<AnyTask>::new(),
            sink.clone(),
        )
        .unwrap();
        let results = pool.results().clone();
        drop(pool);

        // The stream ends once every worker has exited.
        assert!(results.recv().is_none());
        assert_eq!(sink.count("worker_stopped"), 3);
    }
}
