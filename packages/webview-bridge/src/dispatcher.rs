//! Per-call thread-affinity decisions.
//!
//! | engine state          | caller            | strategy                      |
//! |-----------------------|-------------------|-------------------------------|
//! | not started           | any               | queue, or block after start   |
//! | running               | engine thread     | run inline                    |
//! | running               | other thread      | post, or block with deadline  |

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::bootstrap::EngineBootstrap;
use crate::error::{BridgeError, Result};
use crate::looper::Task;
use crate::run_queue::RunQueue;

/// A cross-thread call waiting for its result.
///
/// The task half runs on the engine thread and fills the slot; the caller
/// waits on the slot until the deadline. Timing out does not retract the
/// task, which may still run later.
pub struct BlockingCallTicket<T> {
    operation: &'static str,
    result: Receiver<T>,
    timeout: Duration,
    deadline: Instant,
}

impl<T: Send + 'static> BlockingCallTicket<T> {
    pub fn new(
        operation: &'static str,
        timeout: Duration,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> (Self, Task) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let task: Task = Box::new(move || {
            // The caller may have given up already.
            let _ = tx.send(f());
        });
        let ticket = Self {
            operation,
            result: rx,
            timeout,
            deadline: Instant::now() + timeout,
        };
        (ticket, task)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn wait(self) -> Result<T> {
        match self.result.recv_deadline(self.deadline) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    operation = self.operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probable deadlock: engine thread did not answer in time"
                );
                Err(BridgeError::ProbableDeadlock {
                    operation: self.operation,
                    timeout: self.timeout,
                })
            }
            // The task was dropped without running: the engine thread is gone
            // or the task panicked.
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::EngineGone),
        }
    }
}

/// Routes one view's calls to the engine thread.
pub struct Dispatcher {
    gate: Arc<EngineBootstrap>,
    run_queue: Arc<RunQueue>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(gate: Arc<EngineBootstrap>, run_queue: Arc<RunQueue>, timeout: Duration) -> Self {
        Self {
            gate,
            run_queue,
            timeout,
        }
    }

    pub fn gate(&self) -> &Arc<EngineBootstrap> {
        &self.gate
    }

    pub fn run_queue(&self) -> &Arc<RunQueue> {
        &self.run_queue
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True unless the engine runs and we are on its thread.
    pub fn needs_post(&self) -> bool {
        !self.gate.has_started() || !self.gate.is_on_engine_thread()
    }

    /// Fire-and-forget. Queued before startup, posted from other threads,
    /// inline on the engine thread. Once startup has failed nothing is
    /// queued and the failure is returned instead.
    pub fn post_or_run(&self, operation: &'static str, task: impl FnOnce() + Send + 'static) -> Result<()> {
        if !self.gate.has_started() {
            if let Some(reason) = self.gate.startup_failure() {
                tracing::debug!(operation, reason, "engine failed to start, rejecting");
                return Err(BridgeError::StartupFailed(reason));
            }
            tracing::trace!(operation, "engine not started, queueing");
            self.run_queue.submit(Box::new(task));
            return Ok(());
        }
        if self.gate.is_on_engine_thread() {
            task();
            return Ok(());
        }
        match self.gate.engine_looper() {
            Some(looper) => looper.post(Box::new(task)),
            None => Err(BridgeError::NotStarted { operation }),
        }
    }

    /// Run `f` on the engine thread and wait for its result.
    ///
    /// Must be called after startup and off the engine thread.
    pub fn run_blocking<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T> {
        if !self.gate.has_started() {
            return Err(BridgeError::NotStarted { operation });
        }
        if self.gate.is_on_engine_thread() {
            return Err(BridgeError::ThreadViolation { operation });
        }
        let looper = self
            .gate
            .engine_looper()
            .ok_or(BridgeError::NotStarted { operation })?;
        let (ticket, task) = BlockingCallTicket::new(operation, self.timeout, f);
        looper.post(task)?;
        ticket.wait()
    }

    /// Inline on the engine thread, blocking from anywhere else.
    pub fn call<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T> {
        if !self.needs_post() {
            return Ok(f());
        }
        self.run_blocking(operation, f)
    }

    /// Fail when not on the engine thread. The violation is also logged on
    /// the engine thread so it shows up next to the engine's own output.
    pub fn check_thread(&self, operation: &'static str) -> Result<()> {
        if self.gate.is_on_engine_thread() {
            return Ok(());
        }
        let violation = BridgeError::ThreadViolation { operation };
        if let Some(looper) = self.gate.engine_looper() {
            let reported = violation.clone();
            let _ = looper.post(Box::new(move || {
                tracing::error!(error = %reported, "thread violation");
            }));
        }
        Err(violation)
    }
}
