//! Process-wide entry point.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bootstrap::{EngineBootstrap, ThreadPreference};
use crate::contents::Engine;
use crate::dispatcher::BlockingCallTicket;
use crate::error::{BridgeError, Result};
use crate::logging::init_logging;
use crate::looper::{spawn_looper, LooperHandle};
use crate::options::BridgeOptions;
use crate::services::{CookieStore, GeolocationStore, WebStorage};
use crate::webview::WebView;

/// One per process. Cloning shares the same engine gate.
#[derive(Clone)]
pub struct Bridge {
    gate: Arc<EngineBootstrap>,
}

impl Bridge {
    /// `main_looper` is where the engine runs unless the first caller binds
    /// it to another thread.
    pub fn new(engine: Arc<dyn Engine>, main_looper: LooperHandle, options: BridgeOptions) -> Self {
        init_logging(options.log_filter());
        Self {
            gate: EngineBootstrap::new(main_looper, engine, options),
        }
    }

    /// Spawn a dedicated thread to act as the main looper.
    pub fn with_engine_thread(engine: Arc<dyn Engine>, options: BridgeOptions) -> Result<(Self, EngineThread)> {
        let (looper, join) = spawn_looper(options.engine_thread_name())?;
        let bridge = Self::new(engine, looper.clone(), options);
        Ok((
            bridge,
            EngineThread {
                looper,
                join: Some(join),
            },
        ))
    }

    pub fn gate(&self) -> &Arc<EngineBootstrap> {
        &self.gate
    }

    pub fn options(&self) -> &BridgeOptions {
        self.gate.options()
    }

    pub fn has_started(&self) -> bool {
        self.gate.has_started()
    }

    pub fn start_engines(&self, preference: ThreadPreference) -> Result<()> {
        self.gate.ensure_started(preference)
    }

    pub fn create_web_view(&self) -> WebView {
        WebView::new(self)
    }

    /// Start the engine if needed and run `f` on its thread, waiting for the
    /// result.
    pub fn run_on_engine_thread<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T> {
        self.gate.ensure_started(ThreadPreference::Main)?;
        if self.gate.is_on_engine_thread() {
            return Ok(f());
        }
        let looper = self
            .gate
            .engine_looper()
            .ok_or(BridgeError::NotStarted { operation })?;
        let (ticket, task) = BlockingCallTicket::new(operation, self.options().blocking_timeout(), f);
        looper.post(task)?;
        ticket.wait()
    }

    pub fn cookie_manager(&self) -> Arc<dyn CookieStore> {
        self.gate.cookie_manager()
    }

    pub fn web_storage(&self) -> Result<Arc<dyn WebStorage>> {
        self.gate.web_storage()
    }

    pub fn geolocation_permissions(&self) -> Result<Arc<dyn GeolocationStore>> {
        self.gate.geolocation_permissions()
    }

    pub fn default_user_agent(&self) -> String {
        self.gate.default_user_agent()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge").field("gate", &self.gate).finish()
    }
}

/// A looper thread spawned by [`Bridge::with_engine_thread`]. Dropping it
/// quits the loop and joins the thread.
pub struct EngineThread {
    looper: LooperHandle,
    join: Option<JoinHandle<()>>,
}

impl EngineThread {
    pub fn looper(&self) -> &LooperHandle {
        &self.looper
    }

    /// Quit after the tasks already posted and wait for the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        self.looper.quit();
        join.join().map_err(|_| BridgeError::EngineGone)
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "engine thread panicked");
        }
    }
}
