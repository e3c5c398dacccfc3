//! One-time engine startup.
//!
//! [`EngineBootstrap`] owns the decision of which thread hosts the engine and
//! guarantees the engine is started exactly once. Callers on other threads
//! block until startup finishes; clients created earlier are told once it
//! has.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::contents::Engine;
use crate::draw_functor::{self, DrawFunctorApi};
use crate::error::{BridgeError, Result};
use crate::looper::LooperHandle;
use crate::options::BridgeOptions;
use crate::services::{BrowserContext, CookieStore, GeolocationStore, WebStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    NotStarted,
    Starting,
    Running,
}

/// Which thread to bind the engine to if it is not bound yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPreference {
    /// The process main looper.
    Main,
    /// The calling thread's looper, for view-attachment entry points.
    Current,
}

/// Notified on the engine thread once startup completes.
pub trait StartListener: Send + Sync {
    fn on_engine_started(&self);
}

struct GateState {
    phase: EnginePhase,
    failure: Option<String>,
    // `None` once startup has handed the registry out.
    pending_clients: Option<Vec<Weak<dyn StartListener>>>,
}

pub struct EngineBootstrap {
    state: Mutex<GateState>,
    started_cv: Condvar,
    running: AtomicBool,
    main_looper: LooperHandle,
    engine_looper: OnceLock<LooperHandle>,
    engine: Arc<dyn Engine>,
    options: BridgeOptions,
    browser_context: OnceLock<Arc<BrowserContext>>,
    cookie_store: OnceLock<Arc<dyn CookieStore>>,
    web_storage: OnceLock<Arc<dyn WebStorage>>,
    draw_api: OnceLock<Arc<dyn DrawFunctorApi>>,
}

impl EngineBootstrap {
    pub fn new(main_looper: LooperHandle, engine: Arc<dyn Engine>, options: BridgeOptions) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState {
                phase: EnginePhase::NotStarted,
                failure: None,
                pending_clients: Some(Vec::new()),
            }),
            started_cv: Condvar::new(),
            running: AtomicBool::new(false),
            main_looper,
            engine_looper: OnceLock::new(),
            engine,
            options,
            browser_context: OnceLock::new(),
            cookie_store: OnceLock::new(),
            web_storage: OnceLock::new(),
            draw_api: OnceLock::new(),
        })
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase
    }

    /// Lock-free check used on every dispatch.
    pub fn has_started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn startup_failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    pub fn engine_looper(&self) -> Option<LooperHandle> {
        self.engine_looper.get().cloned()
    }

    pub fn main_looper(&self) -> &LooperHandle {
        &self.main_looper
    }

    pub fn is_on_engine_thread(&self) -> bool {
        self.engine_looper.get().is_some_and(LooperHandle::is_current)
    }

    /// Ask to be told when the engine is running.
    ///
    /// Returns `false` when startup has already completed; the caller should
    /// then treat the engine as running.
    pub fn register_client(&self, client: Weak<dyn StartListener>) -> bool {
        let mut state = self.state.lock();
        if state.phase == EnginePhase::Running {
            return false;
        }
        match state.pending_clients.as_mut() {
            Some(clients) => {
                clients.push(client);
                true
            }
            None => false,
        }
    }

    /// Start the engine if needed and wait until it runs.
    ///
    /// The first call binds the engine thread; later preferences are ignored.
    /// On the engine thread the startup work runs inline, otherwise it is
    /// posted there and this blocks until it has finished.
    pub fn ensure_started(self: &Arc<Self>, preference: ThreadPreference) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase == EnginePhase::Running {
            return Ok(());
        }
        if let Some(reason) = &state.failure {
            return Err(BridgeError::StartupFailed(reason.clone()));
        }

        let looper = self.bind_engine_looper(preference);
        if looper.is_current() {
            let listeners = self.start_locked(&mut state)?;
            drop(state);
            notify_started(listeners);
            return Ok(());
        }

        if state.phase == EnginePhase::NotStarted {
            state.phase = EnginePhase::Starting;
            let gate = Arc::clone(self);
            if let Err(e) = looper.post(Box::new(move || gate.run_posted_startup())) {
                state.failure = Some(e.to_string());
                self.started_cv.notify_all();
                return Err(e);
            }
        }

        while state.phase != EnginePhase::Running && state.failure.is_none() {
            self.started_cv.wait(&mut state);
        }
        match &state.failure {
            Some(reason) => Err(BridgeError::StartupFailed(reason.clone())),
            None => Ok(()),
        }
    }

    fn bind_engine_looper(&self, preference: ThreadPreference) -> LooperHandle {
        let wanted = match preference {
            ThreadPreference::Main => self.main_looper.clone(),
            ThreadPreference::Current => LooperHandle::current().unwrap_or_else(|| {
                tracing::warn!("calling thread has no looper, binding engine to the main looper");
                self.main_looper.clone()
            }),
        };
        let bound = self.engine_looper.get_or_init(|| {
            tracing::info!(looper = wanted.name(), "binding engine thread");
            wanted.clone()
        });
        if !bound.same_looper(&wanted) {
            tracing::debug!(
                bound = bound.name(),
                requested = wanted.name(),
                "engine thread already bound, keeping the first binding"
            );
        }
        bound.clone()
    }

    fn run_posted_startup(&self) {
        let mut state = self.state.lock();
        match self.start_locked(&mut state) {
            Ok(listeners) => {
                drop(state);
                notify_started(listeners);
            }
            Err(e) => tracing::error!(error = %e, "engine startup failed on the engine thread"),
        }
    }

    // Runs on the engine thread with the gate locked. Waiters are woken
    // first, whatever the outcome.
    fn start_locked(
        &self,
        state: &mut MutexGuard<'_, GateState>,
    ) -> Result<Vec<Weak<dyn StartListener>>> {
        self.started_cv.notify_all();
        if state.phase == EnginePhase::Running {
            return Ok(Vec::new());
        }
        if let Some(reason) = &state.failure {
            return Err(BridgeError::StartupFailed(reason.clone()));
        }
        state.phase = EnginePhase::Starting;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.engine.start()));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(BridgeError::StartupFailed(reason))) => Some(reason),
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(reason, "engine startup panicked");
                state.failure = Some(reason);
                self.started_cv.notify_all();
                panic::resume_unwind(payload);
            }
        };
        if let Some(reason) = failure {
            tracing::error!(reason, "engine startup failed");
            state.failure = Some(reason.clone());
            self.started_cv.notify_all();
            return Err(BridgeError::StartupFailed(reason));
        }

        let features = self.engine.platform_features();
        let _ = self.draw_api.set(draw_functor::negotiate(&features));

        state.phase = EnginePhase::Running;
        self.running.store(true, Ordering::SeqCst);
        self.started_cv.notify_all();
        tracing::info!("engine started");
        Ok(state.pending_clients.take().unwrap_or_default())
    }

    /// Shared browsing context. The engine must be running.
    pub fn browser_context(&self) -> Result<Arc<BrowserContext>> {
        if !self.has_started() {
            return Err(BridgeError::NotStarted {
                operation: "browser_context",
            });
        }
        Ok(self
            .browser_context
            .get_or_init(|| Arc::new(BrowserContext::new(self.engine.create_geolocation_store())))
            .clone())
    }

    /// Cookie storage works without starting the engine.
    pub fn cookie_manager(&self) -> Arc<dyn CookieStore> {
        self.cookie_store
            .get_or_init(|| self.engine.create_cookie_store())
            .clone()
    }

    pub fn web_storage(self: &Arc<Self>) -> Result<Arc<dyn WebStorage>> {
        self.ensure_started(ThreadPreference::Main)?;
        Ok(self
            .web_storage
            .get_or_init(|| self.engine.create_web_storage())
            .clone())
    }

    pub fn geolocation_permissions(self: &Arc<Self>) -> Result<Arc<dyn GeolocationStore>> {
        self.ensure_started(ThreadPreference::Main)?;
        Ok(self.browser_context()?.geolocation_permissions())
    }

    pub fn default_user_agent(&self) -> String {
        self.engine.default_user_agent()
    }

    /// The draw functor API negotiated at startup.
    pub fn draw_api(&self) -> Option<Arc<dyn DrawFunctorApi>> {
        self.draw_api.get().cloned()
    }
}

impl fmt::Debug for EngineBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBootstrap")
            .field("phase", &self.phase())
            .field("engine_looper", &self.engine_looper.get())
            .finish()
    }
}

fn notify_started(listeners: Vec<Weak<dyn StartListener>>) {
    let mut dropped = 0;
    for listener in listeners {
        match listener.upgrade() {
            Some(listener) => listener.on_engine_started(),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "skipped clients destroyed before engine startup");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine startup panicked".to_string()
    }
}
