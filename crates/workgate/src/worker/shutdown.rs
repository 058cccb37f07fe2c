//! Shutdown coordination
//!
//! `Running → Draining → Stopped`, or `Draining → TimedOut` when the deadline
//! passes with workers still busy. Only the first caller drives the transition;
//! every other caller blocks until it settles and gets the same outcome.
//!
//! Workers hold a [`ShutdownSignal`] and a clone of the completion sender. The
//! coordinator learns that every worker has exited when the completion channel
//! disconnects.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Accepting and processing tasks
    Running,
    /// Intake closed, workers finishing
    Draining,
    /// All workers exited before the deadline
    Stopped,
    /// The deadline passed first; stragglers may still be running
    TimedOut,
}

impl PoolState {
    /// Whether the pool has left `Running` for good
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Shutdown errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    /// Workers were still running when the deadline passed
    #[error("shutdown timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug)]
struct Phase {
    state: PoolState,
    outcome: Option<Result<(), ShutdownError>>,
}

/// Worker-side view of the shutdown signal
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    cancel: CancellationToken,
    wake_rx: Receiver<()>,
}

impl ShutdownSignal {
    pub(crate) fn is_triggered(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Disconnects (and so becomes permanently ready) once shutdown begins.
    pub(crate) fn wake_rx(&self) -> &Receiver<()> {
        &self.wake_rx
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[derive(Debug)]
pub(crate) struct ShutdownCoordinator {
    phase: Mutex<Phase>,
    settled: Condvar,
    cancel: CancellationToken,
    wake_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl ShutdownCoordinator {
    /// Returns the coordinator, the signal to clone into each worker and the
    /// completion sender each worker must hold until it exits.
    pub(crate) fn new() -> (Self, ShutdownSignal, Sender<()>) {
        let cancel = CancellationToken::new();
        let (wake_tx, wake_rx) = channel::bounded(0);
        let (done_tx, done_rx) = channel::bounded(0);

        let coordinator = Self {
            phase: Mutex::new(Phase {
                state: PoolState::Running,
                outcome: None,
            }),
            settled: Condvar::new(),
            cancel: cancel.clone(),
            wake_tx: Mutex::new(Some(wake_tx)),
            done_rx,
        };
        let signal = ShutdownSignal { cancel, wake_rx };

        (coordinator, signal, done_tx)
    }

    pub(crate) fn state(&self) -> PoolState {
        self.phase.lock().state
    }

    /// Drive or join a shutdown.
    ///
    /// The driving caller runs `close_intake` before cancelling the workers and
    /// `on_timeout` if the deadline passes. Neither runs for joining callers.
    pub(crate) fn shutdown(
        &self,
        timeout: Duration,
        close_intake: impl FnOnce(),
        on_timeout: impl FnOnce(),
    ) -> Result<(), ShutdownError> {
        let mut phase = self.phase.lock();
        match phase.state {
            PoolState::Running => {
                phase.state = PoolState::Draining;
            }
            PoolState::Draining => {
                while phase.outcome.is_none() {
                    self.settled.wait(&mut phase);
                }
                return phase.outcome.unwrap_or(Ok(()));
            }
            PoolState::Stopped | PoolState::TimedOut => {
                return phase.outcome.unwrap_or(Ok(()));
            }
        }
        drop(phase);

        close_intake();
        self.signal_workers();

        // A deadline past the clock's range means waiting without a limit.
        let deadline = Instant::now().checked_add(timeout);
        let outcome = self.wait_for_workers(deadline, timeout);
        if outcome.is_err() {
            on_timeout();
        }

        let mut phase = self.phase.lock();
        phase.state = match outcome {
            Ok(()) => PoolState::Stopped,
            Err(_) => PoolState::TimedOut,
        };
        phase.outcome = Some(outcome);
        self.settled.notify_all();
        outcome
    }

    /// Start draining without waiting. Used when the pool is dropped while
    /// still running; no caller can join this shutdown afterwards.
    pub(crate) fn trigger(&self, close_intake: impl FnOnce()) {
        {
            let mut phase = self.phase.lock();
            if phase.state != PoolState::Running {
                return;
            }
            phase.state = PoolState::Draining;
        }
        close_intake();
        self.signal_workers();
    }

    fn signal_workers(&self) {
        self.cancel.cancel();
        self.wake_tx.lock().take();
    }

    fn wait_for_workers(
        &self,
        deadline: Option<Instant>,
        timeout: Duration,
    ) -> Result<(), ShutdownError> {
        let Some(deadline) = deadline else {
            while self.done_rx.recv().is_ok() {}
            return Ok(());
        };
        loop {
            match self.done_rx.recv_deadline(deadline) {
                // Workers never send; only disconnection matters.
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => return Err(ShutdownError::TimedOut(timeout)),
            }
        }
    }
}
