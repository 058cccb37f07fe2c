//! Handler registry
//!
//! Maps a task's kind tag to the function that processes it. The registry is
//! assembled before the pool starts and moved into it; it cannot change afterwards.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::task::Task;

/// Error returned by a task handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Handler execution result
pub type HandlerResult = Result<(), HandlerError>;

/// Why a dequeued task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    /// No handler registered for the task's kind
    #[error("unsupported task kind: {0}")]
    UnsupportedKind(String),

    /// The handler returned an error
    #[error("handler failed: {0}")]
    Handler(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<HandlerError> for TaskError {
    fn from(err: HandlerError) -> Self {
        Self::Handler(err.0)
    }
}

/// Per-dispatch context handed to handlers
#[derive(Debug, Clone)]
pub struct TaskContext {
    worker_id: usize,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Contexts are normally built by the pool; this is for running a handler directly.
    pub fn new(worker_id: usize, cancel: CancellationToken) -> Self {
        Self { worker_id, cancel }
    }

    /// Index of the worker running the handler
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Whether the pool has started shutting down.
    ///
    /// Handlers are never preempted; long-running ones should poll this.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The pool's shutdown token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Type-erased task handler
pub type Handler<T> = Arc<dyn Fn(&T, &TaskContext) -> HandlerResult + Send + Sync>;

/// Kind tag → handler map
///
/// # Example
///
/// ```
/// use workgate::task::{AnyTask, IMAGE_PROCESSING};
/// use workgate::worker::HandlerRegistry;
///
/// let registry = HandlerRegistry::<AnyTask>::new()
///     .with_handler(IMAGE_PROCESSING, |_task, _ctx| Ok(()));
/// assert!(registry.contains(IMAGE_PROCESSING));
/// ```
pub struct HandlerRegistry<T> {
    handlers: HashMap<String, Handler<T>>,
}

impl<T: Task> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl<T: Task> HandlerRegistry<T> {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a kind, replacing any previous one
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&T, &TaskContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_handler<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&T, &TaskContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(kind, handler);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a task to its handler.
    ///
    /// Handler panics are caught and reported as [`TaskError::Panicked`].
    pub fn dispatch(&self, task: &T, ctx: &TaskContext) -> Result<(), TaskError> {
        let handler = self
            .handlers
            .get(task.kind())
            .ok_or_else(|| TaskError::UnsupportedKind(task.kind().to_string()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler(task, ctx))) {
            Ok(result) => result.map_err(TaskError::from),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
