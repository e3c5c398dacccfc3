//! Node bindings. The JavaScript main thread hosts the engine looper and
//! drives it through `pumpEvents()`; the engine is the headless one.

use std::cell::RefCell;
use std::sync::Arc;

use napi::bindgen_prelude::*;
use napi::threadsafe_function::{
    ErrorStrategy, ThreadSafeCallContext, ThreadsafeFunction, ThreadsafeFunctionCallMode,
};
use napi::JsFunction;

use crate::bootstrap::ThreadPreference;
use crate::bridge::Bridge;
use crate::events::{ScriptResultCallback, WebViewEventHandlers};
use crate::headless::HeadlessEngine;
use crate::looper::Looper;
use crate::options::BridgeOptions;
use crate::webview::WebView;

/// Options accepted by `init()`.
#[napi(object)]
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Milliseconds a blocking call waits before reporting a probable
    /// deadlock. Default: 4000
    pub blocking_timeout_ms: Option<u32>,
    /// Application target API level. Default: latest
    pub target_api_level: Option<u32>,
    /// Log filter used when `RUST_LOG` is unset. Default: "info"
    pub log_filter: Option<String>,
}

impl From<InitOptions> for BridgeOptions {
    fn from(opts: InitOptions) -> Self {
        BridgeOptions {
            blocking_timeout_ms: opts.blocking_timeout_ms.map(u64::from),
            target_api_level: opts.target_api_level,
            log_filter: opts.log_filter,
            ..BridgeOptions::default()
        }
    }
}

/// Information about the engine behind the bridge.
#[napi(object)]
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    /// Whether `init()` has been called.
    pub available: bool,
    /// Whether the engine has finished starting.
    pub started: bool,
    /// The engine's default user agent, once initialized.
    pub user_agent: Option<String>,
}

struct NodeState {
    bridge: Bridge,
    looper: Looper,
}

thread_local! {
    static STATE: RefCell<Option<NodeState>> = const { RefCell::new(None) };
}

fn bridge() -> Result<Bridge> {
    STATE.with(|state| {
        state
            .borrow()
            .as_ref()
            .map(|s| s.bridge.clone())
            .ok_or_else(|| Error::from_reason("Web view bridge not initialized. Call init() first."))
    })
}

/// Initialize the bridge on the calling (JavaScript main) thread.
/// Must be called once before creating any web views.
#[napi]
pub fn init(options: Option<InitOptions>) -> Result<()> {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.is_some() {
            return Ok(());
        }
        let looper = Looper::prepare()?;
        let bridge = Bridge::new(
            Arc::new(HeadlessEngine::new()),
            looper.handle(),
            options.unwrap_or_default().into(),
        );
        bridge.start_engines(ThreadPreference::Main)?;
        *state = Some(NodeState { bridge, looper });
        Ok(())
    })
}

/// Run the engine tasks queued since the last call and return how many ran.
/// Call this periodically (e.g. every 16ms via setInterval) to keep web
/// views responsive.
#[napi]
pub fn pump_events() -> Result<u32> {
    STATE.with(|state| {
        let mut state = state
            .try_borrow_mut()
            .map_err(|_| Error::from_reason("pumpEvents() called re-entrantly"))?;
        let state = state
            .as_mut()
            .ok_or_else(|| Error::from_reason("Web view bridge not initialized. Call init() first."))?;
        Ok(state.looper.pump() as u32)
    })
}

#[napi]
pub fn check_runtime() -> RuntimeInfo {
    match bridge() {
        Ok(bridge) => RuntimeInfo {
            available: true,
            started: bridge.has_started(),
            user_agent: Some(bridge.default_user_agent()),
        },
        Err(_) => RuntimeInfo {
            available: false,
            started: false,
            user_agent: None,
        },
    }
}

/// A web view backed by the headless engine.
#[napi]
pub struct NativeWebView {
    view: WebView,
    handlers: Arc<WebViewEventHandlers>,
}

#[napi]
impl NativeWebView {
    #[napi(constructor)]
    pub fn new(private_browsing: Option<bool>) -> Result<Self> {
        let view = bridge()?.create_web_view();
        let handlers = Arc::new(WebViewEventHandlers::default());
        view.set_web_view_client(Some(handlers.clone()));
        view.set_web_chrome_client(Some(handlers.clone()));
        view.set_find_listener(Some(handlers.clone()));
        view.init(private_browsing.unwrap_or(false))?;
        Ok(Self { view, handlers })
    }

    // ---- Content loading ----

    #[napi]
    pub fn load_url(&self, url: String) -> Result<()> {
        Ok(self.view.load_url(url.trim())?)
    }

    #[napi]
    pub fn load_data(&self, data: String, mime_type: Option<String>, encoding: Option<String>) -> Result<()> {
        Ok(self
            .view
            .load_data(&data, mime_type.as_deref(), encoding.as_deref())?)
    }

    #[napi]
    pub fn load_data_with_base_url(
        &self,
        base_url: Option<String>,
        data: String,
        mime_type: Option<String>,
        encoding: Option<String>,
        history_url: Option<String>,
    ) -> Result<()> {
        Ok(self.view.load_data_with_base_url(
            base_url.as_deref(),
            &data,
            mime_type.as_deref(),
            encoding.as_deref(),
            history_url.as_deref(),
        )?)
    }

    #[napi]
    pub fn post_url(&self, url: String, body: String) -> Result<()> {
        Ok(self.view.post_url(&url, body.into_bytes())?)
    }

    /// Evaluate `script`; the optional callback receives the JSON result.
    #[napi(ts_args_type = "script: string, callback?: (result: string) => void")]
    pub fn evaluate_js(&self, script: String, callback: Option<JsFunction>) -> Result<()> {
        let callback = match callback {
            Some(callback) => {
                let tsfn: ScriptResultCallback = callback
                    .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<String>| {
                        ctx.env.create_string(ctx.value.as_str()).map(|v| vec![v])
                    })?;
                let callback: crate::contents::ValueCallback = Box::new(move |result: String| {
                    tsfn.call(result, ThreadsafeFunctionCallMode::NonBlocking);
                });
                Some(callback)
            }
            None => None,
        };
        Ok(self.view.evaluate_javascript(&script, callback)?)
    }

    // ---- Navigation ----

    #[napi]
    pub fn stop_loading(&self) -> Result<()> {
        Ok(self.view.stop_loading()?)
    }

    #[napi]
    pub fn reload(&self) -> Result<()> {
        Ok(self.view.reload()?)
    }

    #[napi]
    pub fn can_go_back(&self) -> Result<bool> {
        Ok(self.view.can_go_back()?)
    }

    #[napi]
    pub fn go_back(&self) -> Result<()> {
        Ok(self.view.go_back()?)
    }

    #[napi]
    pub fn can_go_forward(&self) -> Result<bool> {
        Ok(self.view.can_go_forward()?)
    }

    #[napi]
    pub fn go_forward(&self) -> Result<()> {
        Ok(self.view.go_forward()?)
    }

    #[napi]
    pub fn clear_history(&self) -> Result<()> {
        Ok(self.view.clear_history()?)
    }

    // ---- Queries ----

    #[napi(getter)]
    pub fn url(&self) -> Result<Option<String>> {
        Ok(self.view.url()?)
    }

    #[napi(getter)]
    pub fn title(&self) -> Result<Option<String>> {
        Ok(self.view.title()?)
    }

    #[napi(getter)]
    pub fn progress(&self) -> u32 {
        self.view.progress()
    }

    #[napi(getter)]
    pub fn content_height(&self) -> u32 {
        self.view.content_height()
    }

    /// Saved navigation state as a JSON string, or `null`.
    #[napi]
    pub fn save_state(&self) -> Result<Option<String>> {
        match self.view.save_state()? {
            Some(state) => Ok(Some(state.to_json()?)),
            None => Ok(None),
        }
    }

    #[napi]
    pub fn restore_state(&self, json: String) -> Result<bool> {
        let state = crate::contents::SavedState::from_json(&json)?;
        Ok(self.view.restore_state(&state)?.is_some())
    }

    // ---- Find in page ----

    #[napi]
    pub fn find_all(&self, text: String) -> Result<()> {
        Ok(self.view.find_all_async(&text)?)
    }

    #[napi]
    pub fn find_next(&self, forward: bool) -> Result<()> {
        Ok(self.view.find_next(forward)?)
    }

    #[napi]
    pub fn clear_matches(&self) -> Result<()> {
        Ok(self.view.clear_matches()?)
    }

    #[napi]
    pub fn destroy(&self) -> Result<()> {
        Ok(self.view.destroy()?)
    }

    // ---- Event handlers ----

    /// Register a handler for page load events.
    #[napi(ts_args_type = "callback: (event: 'started' | 'finished', url: string) => void")]
    pub fn on_page_load(&self, callback: JsFunction) -> Result<()> {
        let tsfn: ThreadsafeFunction<(String, String), ErrorStrategy::Fatal> = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<(String, String)>| {
                let event_type = ctx.env.create_string(&ctx.value.0)?;
                let url = ctx.env.create_string(&ctx.value.1)?;
                Ok(vec![event_type, url])
            })?;
        *self.handlers.on_page_load.lock() = Some(tsfn);
        Ok(())
    }

    /// Register a handler for document title change events.
    #[napi(ts_args_type = "callback: (title: string) => void")]
    pub fn on_title_changed(&self, callback: JsFunction) -> Result<()> {
        let tsfn: ThreadsafeFunction<String, ErrorStrategy::Fatal> = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<String>| {
                ctx.env.create_string(ctx.value.as_str()).map(|v| vec![v])
            })?;
        *self.handlers.on_title_changed.lock() = Some(tsfn);
        Ok(())
    }

    /// Register a handler for load progress.
    #[napi(ts_args_type = "callback: (progress: number) => void")]
    pub fn on_progress(&self, callback: JsFunction) -> Result<()> {
        let tsfn: ThreadsafeFunction<u32, ErrorStrategy::Fatal> = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<u32>| {
                ctx.env.create_uint32(ctx.value).map(|v| vec![v])
            })?;
        *self.handlers.on_progress.lock() = Some(tsfn);
        Ok(())
    }

    /// Register a handler for find-in-page results.
    #[napi(ts_args_type = "callback: (activeMatch: number, matches: number, done: boolean) => void")]
    pub fn on_find_result(&self, callback: JsFunction) -> Result<()> {
        let tsfn: ThreadsafeFunction<(u32, u32, bool), ErrorStrategy::Fatal> = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<(u32, u32, bool)>| {
                let active = ctx.env.create_uint32(ctx.value.0)?.into_unknown();
                let matches = ctx.env.create_uint32(ctx.value.1)?.into_unknown();
                let done = ctx.env.get_boolean(ctx.value.2)?.into_unknown();
                Ok(vec![active, matches, done])
            })?;
        *self.handlers.on_find_result.lock() = Some(tsfn);
        Ok(())
    }

    /// Register a handler for load errors.
    #[napi(ts_args_type = "callback: (code: number, description: string, url: string) => void")]
    pub fn on_load_error(&self, callback: JsFunction) -> Result<()> {
        let tsfn: ThreadsafeFunction<(i32, String, String), ErrorStrategy::Fatal> = callback
            .create_threadsafe_function(0, |ctx: ThreadSafeCallContext<(i32, String, String)>| {
                let code = ctx.env.create_int32(ctx.value.0)?.into_unknown();
                let description = ctx.env.create_string(&ctx.value.1)?.into_unknown();
                let url = ctx.env.create_string(&ctx.value.2)?.into_unknown();
                Ok(vec![code, description, url])
            })?;
        *self.handlers.on_load_error.lock() = Some(tsfn);
        Ok(())
    }
}
