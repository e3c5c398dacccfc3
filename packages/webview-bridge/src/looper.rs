//! Thread-bound task loops.
//!
//! A [`Looper`] pins a FIFO of tasks to the thread that prepared it. Other
//! threads hold a [`LooperHandle`] and post work to it; the owning thread
//! either pumps pending tasks periodically (the host drives the loop, e.g.
//! from a UI timer) or blocks in [`Looper::run`] until told to quit.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{BridgeError, Result};

/// A unit of work posted to a looper.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Quit,
}

thread_local! {
    static CURRENT: RefCell<Option<LooperHandle>> = const { RefCell::new(None) };
}

struct HandleInner {
    sender: Sender<Message>,
    thread: ThreadId,
    name: String,
}

/// Cloneable, thread-safe reference to a looper.
#[derive(Clone)]
pub struct LooperHandle {
    inner: Arc<HandleInner>,
}

impl LooperHandle {
    /// The looper bound to the calling thread, if any.
    pub fn current() -> Option<LooperHandle> {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub fn post(&self, task: Task) -> Result<()> {
        self.inner
            .sender
            .send(Message::Run(task))
            .map_err(|_| BridgeError::EngineGone)
    }

    /// Ask the loop to stop. Tasks posted before the quit still run.
    pub fn quit(&self) {
        let _ = self.inner.sender.send(Message::Quit);
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn same_looper(&self, other: &LooperHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LooperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperHandle")
            .field("name", &self.inner.name)
            .field("thread", &self.inner.thread)
            .finish()
    }
}

/// The receiving end of a task loop. Stays on the thread that prepared it.
pub struct Looper {
    receiver: Receiver<Message>,
    handle: LooperHandle,
    quit: bool,
    _not_send: PhantomData<*const ()>,
}

impl Looper {
    /// Bind a new task loop to the calling thread.
    pub fn prepare() -> Result<Looper> {
        if LooperHandle::current().is_some() {
            return Err(BridgeError::InvalidArgument(
                "a looper is already prepared on this thread".to_string(),
            ));
        }
        let current = thread::current();
        let name = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = LooperHandle {
            inner: Arc::new(HandleInner {
                sender,
                thread: current.id(),
                name,
            }),
        };
        CURRENT.with(|c| *c.borrow_mut() = Some(handle.clone()));
        Ok(Looper {
            receiver,
            handle,
            quit: false,
            _not_send: PhantomData,
        })
    }

    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    /// Run every task that is pending right now without blocking.
    ///
    /// Tasks posted while pumping wait for the next pump. Returns the number
    /// of tasks executed.
    pub fn pump(&mut self) -> usize {
        let pending = self.receiver.len();
        let mut ran = 0;
        for _ in 0..pending {
            match self.receiver.try_recv() {
                Ok(Message::Run(task)) => {
                    task();
                    ran += 1;
                }
                Ok(Message::Quit) => {
                    self.quit = true;
                    break;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Block processing tasks until [`LooperHandle::quit`] is called.
    pub fn run(&mut self) {
        while !self.quit {
            match self.receiver.recv() {
                Ok(Message::Run(task)) => task(),
                Ok(Message::Quit) | Err(_) => self.quit = true,
            }
        }
    }

    pub fn has_quit(&self) -> bool {
        self.quit
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            let mut current = c.borrow_mut();
            if current
                .as_ref()
                .is_some_and(|h| h.same_looper(&self.handle))
            {
                *current = None;
            }
        });
    }
}

/// Start a named thread that runs a looper until it is quit.
pub fn spawn_looper(name: &str) -> Result<(LooperHandle, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut looper = match Looper::prepare() {
                Ok(looper) => looper,
                Err(e) => {
                    tracing::error!(error = %e, "failed to prepare looper");
                    return;
                }
            };
            if tx.send(looper.handle()).is_err() {
                return;
            }
            looper.run();
        })
        .map_err(|e| BridgeError::StartupFailed(format!("failed to spawn {name}: {e}")))?;
    let handle = rx.recv().map_err(|_| BridgeError::EngineGone)?;
    Ok((handle, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[test]
    fn pump_runs_pending_tasks_in_post_order() {
        let mut looper = Looper::prepare().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            looper
                .handle()
                .post(Box::new(move || log.lock().push(i)))
                .unwrap();
        }
        assert_eq!(looper.pump(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn tasks_posted_while_pumping_wait_for_next_pump() {
        let mut looper = Looper::prepare().unwrap();
        let handle = looper.handle();
        let hits = Arc::new(Mutex::new(0));
        let inner_hits = hits.clone();
        let inner_handle = handle.clone();
        handle
            .post(Box::new(move || {
                let hits = inner_hits.clone();
                inner_handle
                    .post(Box::new(move || *hits.lock() += 1))
                    .unwrap();
            }))
            .unwrap();
        assert_eq!(looper.pump(), 1);
        assert_eq!(*hits.lock(), 0);
        assert_eq!(looper.pump(), 1);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn second_prepare_on_same_thread_is_rejected() {
        let _looper = Looper::prepare().unwrap();
        assert!(matches!(
            Looper::prepare(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn current_is_cleared_when_looper_drops() {
        let looper = Looper::prepare().unwrap();
        assert!(LooperHandle::current().unwrap().is_current());
        drop(looper);
        assert!(LooperHandle::current().is_none());
    }

    #[test]
    fn spawned_looper_runs_on_its_own_thread() {
        let (handle, join) = spawn_looper("looper-test").unwrap();
        assert!(!handle.is_current());
        let (tx, rx) = crossbeam_channel::bounded(1);
        let remote = handle.clone();
        handle
            .post(Box::new(move || {
                tx.send((remote.is_current(), thread::current().name().map(String::from)))
                    .unwrap();
            }))
            .unwrap();
        let (on_looper, name) = rx.recv().unwrap();
        assert!(on_looper);
        assert_eq!(name.as_deref(), Some("looper-test"));
        handle.quit();
        join.join().unwrap();
    }

    #[test]
    fn posting_to_a_dropped_looper_reports_engine_gone() {
        let (handle, join) = spawn_looper("short-lived").unwrap();
        handle.quit();
        join.join().unwrap();
        let err = handle.post(Box::new(|| {})).unwrap_err();
        assert_eq!(err, BridgeError::EngineGone);
    }
}
