// Pool observability events
//
// The pool reports discrete lifecycle and warning events through an EventSink.
// TracingSink is the default and turns each event into a structured tracing
// record; MemorySink keeps them for inspection.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::saturating_millis;

/// Discrete events raised by a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// A worker thread entered its loop
    WorkerStarted { pool: String, worker_id: usize },

    /// A worker thread left its loop
    WorkerStopped { pool: String, worker_id: usize },

    /// A submission was rejected by `Task::validate`
    ValidationFailed {
        pool: String,
        task_id: String,
        kind: String,
        reason: String,
    },

    /// No handler is registered for a dequeued task's kind
    UnsupportedKind {
        pool: String,
        task_id: String,
        kind: String,
    },

    /// A result was discarded because the result channel was full
    ResultDropped { pool: String, task_id: String },

    /// Shutdown deadline elapsed with workers still running
    ShutdownTimedOut {
        pool: String,
        #[serde(with = "crate::config::duration_millis")]
        timeout: Duration,
        live_workers: usize,
    },
}

impl PoolEvent {
    /// Stable snake_case name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkerStarted { .. } => "worker_started",
            Self::WorkerStopped { .. } => "worker_stopped",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::UnsupportedKind { .. } => "unsupported_kind",
            Self::ResultDropped { .. } => "result_dropped",
            Self::ShutdownTimedOut { .. } => "shutdown_timed_out",
        }
    }

    /// Name of the pool that raised the event
    pub fn pool(&self) -> &str {
        match self {
            Self::WorkerStarted { pool, .. } => pool,
            Self::WorkerStopped { pool, .. } => pool,
            Self::ValidationFailed { pool, .. } => pool,
            Self::UnsupportedKind { pool, .. } => pool,
            Self::ResultDropped { pool, .. } => pool,
            Self::ShutdownTimedOut { pool, .. } => pool,
        }
    }
}

/// Receiver of pool events
///
/// Called synchronously from worker and producer threads; implementations
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PoolEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PoolEvent) {
        match event {
            PoolEvent::WorkerStarted { pool, worker_id } => {
                info!(pool = %pool, worker_id, "Worker started");
            }
            PoolEvent::WorkerStopped { pool, worker_id } => {
                info!(pool = %pool, worker_id, "Worker shutting down");
            }
            PoolEvent::ValidationFailed {
                pool,
                task_id,
                kind,
                reason,
            } => {
                // Admission rejections are the caller's concern, not a system fault.
                debug!(pool = %pool, task_id = %task_id, kind = %kind, reason = %reason, "Task rejected by validation");
            }
            PoolEvent::UnsupportedKind {
                pool,
                task_id,
                kind,
            } => {
                warn!(pool = %pool, task_id = %task_id, kind = %kind, "No handler registered for task kind");
            }
            PoolEvent::ResultDropped { pool, task_id } => {
                warn!(pool = %pool, task_id = %task_id, "Result channel full, dropping result");
            }
            PoolEvent::ShutdownTimedOut {
                pool,
                timeout,
                live_workers,
            } => {
                error!(
                    pool = %pool,
                    timeout_ms = saturating_millis(*timeout),
                    live_workers,
                    "Shutdown timeout exceeded"
                );
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PoolEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &PoolEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = PoolEvent::ResultDropped {
            pool: "p".into(),
            task_id: "t".into(),
        };
        assert_eq!(event.name(), "result_dropped");
        assert_eq!(event.pool(), "p");
    }

    #[test]
    fn test_event_serialization() {
        let event = PoolEvent::ShutdownTimedOut {
            pool: "p".into(),
            timeout: Duration::from_millis(1500),
            live_workers: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "shutdown_timed_out");
        assert_eq!(json["timeout"], 1500);

        let parsed: PoolEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_memory_sink_counts() {
        let sink = MemorySink::new();
        sink.emit(&PoolEvent::WorkerStarted {
            pool: "p".into(),
            worker_id: 0,
        });
        sink.emit(&PoolEvent::WorkerStarted {
            pool: "p".into(),
            worker_id: 1,
        });
        sink.emit(&PoolEvent::WorkerStopped {
            pool: "p".into(),
            worker_id: 0,
        });

        assert_eq!(sink.count("worker_started"), 2);
        assert_eq!(sink.count("worker_stopped"), 1);
        assert_eq!(sink.events().len(), 3);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingSink.emit(&PoolEvent::UnsupportedKind {
            pool: "p".into(),
            task_id: "t".into(),
            kind: "video".into(),
        });
    }
}
