//! Buffer for work requested before the engine is running.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bootstrap::EngineBootstrap;
use crate::looper::Task;

/// FIFO of deferred tasks, replayed on the engine thread once it runs.
pub struct RunQueue {
    tasks: Mutex<VecDeque<Task>>,
    gate: Arc<EngineBootstrap>,
}

impl RunQueue {
    pub fn new(gate: Arc<EngineBootstrap>) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
            gate,
        })
    }

    /// Append `task`. If the engine is already running a drain is posted to
    /// the engine thread, so a task that lost the race with startup still
    /// runs.
    pub fn submit(self: &Arc<Self>, task: Task) {
        self.tasks.lock().push_back(task);
        if !self.gate.has_started() {
            return;
        }
        let Some(looper) = self.gate.engine_looper() else {
            return;
        };
        let queue = Arc::clone(self);
        if let Err(e) = looper.post(Box::new(move || {
            queue.drain();
        })) {
            tracing::error!(error = %e, "failed to schedule run queue drain");
        }
    }

    /// Run queued tasks in submission order until the queue is empty.
    ///
    /// Only runs on the engine thread after startup; elsewhere nothing is
    /// executed. The lock is released while a task runs, so tasks may submit
    /// more work, which also runs before this returns. Returns the number of
    /// tasks executed.
    pub fn drain(&self) -> usize {
        if !self.gate.has_started() || !self.gate.is_on_engine_thread() {
            tracing::error!("run queue drained off the engine thread or before startup");
            return 0;
        }
        let mut ran = 0;
        loop {
            let next = self.tasks.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            tracing::debug!(tasks = ran, "drained run queue");
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::ThreadPreference;
    use crate::headless::HeadlessEngine;
    use crate::looper::Looper;
    use crate::options::BridgeOptions;
    use pretty_assertions::assert_eq;

    fn gate_on_this_thread() -> (Looper, Arc<EngineBootstrap>) {
        let looper = Looper::prepare().unwrap();
        let gate = EngineBootstrap::new(
            looper.handle(),
            Arc::new(HeadlessEngine::new()),
            BridgeOptions::default(),
        );
        (looper, gate)
    }

    #[test]
    fn drain_before_startup_runs_nothing() {
        let (_looper, gate) = gate_on_this_thread();
        let queue = RunQueue::new(gate);
        queue.submit(Box::new(|| panic!("must not run")));
        assert_eq!(queue.drain(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn nested_submissions_finish_within_one_drain() {
        let (mut looper, gate) = gate_on_this_thread();
        gate.ensure_started(ThreadPreference::Main).unwrap();
        // Startup posted nothing for this queue; clear whatever else is pending.
        looper.pump();

        let queue = RunQueue::new(gate);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut tasks = queue.tasks.lock();
            for i in 0..3 {
                let log = log.clone();
                let inner_queue = queue.clone();
                tasks.push_back(Box::new(move || {
                    log.lock().push(i);
                    if i == 0 {
                        let log = log.clone();
                        inner_queue.tasks.lock().push_back(Box::new(move || log.lock().push(10)));
                    }
                }));
            }
        }
        assert_eq!(queue.drain(), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 10]);
        assert!(queue.is_empty());
    }

    #[test]
    fn submit_after_startup_posts_a_drain() {
        let (mut looper, gate) = gate_on_this_thread();
        gate.ensure_started(ThreadPreference::Main).unwrap();
        looper.pump();

        let queue = RunQueue::new(gate);
        let hit = Arc::new(Mutex::new(false));
        let flag = hit.clone();
        queue.submit(Box::new(move || *flag.lock() = true));
        assert!(!*hit.lock());
        assert_eq!(looper.pump(), 1);
        assert!(*hit.lock());
    }
}
