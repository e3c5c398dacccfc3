//! The public web view facade.
//!
//! Every call is routed through the view's [`Dispatcher`]: before the engine
//! runs, fire-and-forget calls are queued; on the engine thread they run
//! inline; from any other thread they are posted, and calls that return a
//! value block until the engine thread answers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;

use crate::bootstrap::{EngineBootstrap, StartListener, ThreadPreference};
use crate::bridge::Bridge;
use crate::client::{
    ContentsClientAdapter, DownloadListener, FindListener, WebChromeClient, WebViewClient,
};
use crate::contents::{
    BackForwardList, ContentMetrics, Contents, ContentsInit, LoadUrlParams, SavedState,
    ValueCallback,
};
use crate::dispatcher::Dispatcher;
use crate::draw_functor::{DrawCanvas, DrawFunctor, ViewRoot};
use crate::error::{BridgeError, Result};
use crate::run_queue::RunQueue;
use crate::settings::{EngineSettings, WebSettings};

const PRIVATE_BROWSING_UNSUPPORTED: &str = "Private browsing is not supported in WebView.";
const JAVASCRIPT_SCHEME: &str = "javascript:";

struct WebViewInner {
    gate: Arc<EngineBootstrap>,
    dispatcher: Dispatcher,
    client: Arc<ContentsClientAdapter>,
    engine_settings: Arc<Mutex<EngineSettings>>,
    settings: WebSettings,
    metrics: Arc<ContentMetrics>,
    // Only touched on the engine thread. A failed `try_lock` means a call
    // re-entered from inside another contents call.
    contents: Mutex<Option<Box<dyn Contents>>>,
    functor: Mutex<Option<DrawFunctor>>,
    initialized: AtomicBool,
}

impl WebViewInner {
    fn with_contents<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn Contents) -> R,
    ) -> Result<R> {
        let mut slot = self
            .contents
            .try_lock()
            .ok_or(BridgeError::ReentrantCall { operation })?;
        let contents = slot.as_deref_mut().ok_or(BridgeError::ContentsNotCreated)?;
        Ok(f(contents))
    }

    fn create_contents(&self) -> Result<()> {
        let init = ContentsInit {
            browser_context: self.gate.browser_context()?,
            client: Arc::clone(&self.client),
            settings: Arc::clone(&self.engine_settings),
            metrics: Arc::clone(&self.metrics),
        };
        let contents = self.gate.engine().create_contents(init)?;
        *self
            .contents
            .try_lock()
            .ok_or(BridgeError::ReentrantCall { operation: "init" })? = Some(contents);

        if let Some(api) = self.gate.draw_api() {
            *self.functor.lock() = Some(DrawFunctor::new(Arc::clone(self.gate.engine()), api));
        }
        tracing::debug!("engine contents created");
        Ok(())
    }

    fn destroy_contents(&self) -> Result<()> {
        let contents = self
            .contents
            .try_lock()
            .ok_or(BridgeError::ReentrantCall { operation: "destroy" })?
            .take();
        if let Some(mut contents) = contents {
            contents.destroy();
        }
        if let Some(mut functor) = self.functor.lock().take() {
            functor.destroy();
        }
        Ok(())
    }
}

impl StartListener for WebViewInner {
    fn on_engine_started(&self) {
        self.dispatcher.run_queue().drain();
    }
}

/// A web view. Cheap to clone; clones are the same view.
#[derive(Clone)]
pub struct WebView {
    inner: Arc<WebViewInner>,
}

/// Non-owning reference to a [`WebView`].
#[derive(Clone, Default)]
pub struct WeakWebView(Weak<WebViewInner>);

impl WeakWebView {
    /// A reference that never upgrades.
    pub fn new() -> Self {
        Self(Weak::new())
    }

    pub fn upgrade(&self) -> Option<WebView> {
        self.0.upgrade().map(|inner| WebView { inner })
    }
}

impl WebView {
    /// Create a view bound to `bridge`. Nothing touches the engine until
    /// [`init`](Self::init).
    pub fn new(bridge: &Bridge) -> Self {
        let gate = Arc::clone(bridge.gate());
        let engine_settings = Arc::new(Mutex::new(EngineSettings::for_options(gate.options())));
        let settings = WebSettings::new(Arc::clone(&engine_settings), gate.default_user_agent());
        let dispatcher = Dispatcher::new(
            Arc::clone(&gate),
            RunQueue::new(Arc::clone(&gate)),
            gate.options().blocking_timeout(),
        );

        let inner = Arc::new_cyclic(|weak: &Weak<WebViewInner>| WebViewInner {
            gate,
            dispatcher,
            client: Arc::new(ContentsClientAdapter::new(WeakWebView(weak.clone()))),
            engine_settings,
            settings,
            metrics: Arc::new(ContentMetrics::new()),
            contents: Mutex::new(None),
            functor: Mutex::new(None),
            initialized: AtomicBool::new(false),
        });

        let listener: Weak<WebViewInner> = Arc::downgrade(&inner);
        let listener: Weak<dyn StartListener> = listener;
        if !inner.gate.register_client(listener) {
            tracing::trace!("engine already running, web view not registered for startup");
        }
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakWebView {
        WeakWebView(Arc::downgrade(&self.inner))
    }

    /// True when both handles refer to the same view.
    pub fn ptr_eq(&self, other: &WebView) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind the view to engine contents.
    ///
    /// Apps targeting JB MR2 or later start the engine on the calling thread
    /// and must call this there. Private browsing is rejected from KitKat on;
    /// older targets get a warning and a view whose contents are destroyed
    /// right after creation.
    pub fn init(&self, private_browsing: bool) -> Result<()> {
        let gate = &self.inner.gate;
        let options = gate.options();

        if private_browsing {
            gate.ensure_started(ThreadPreference::Main)?;
            if options.rejects_private_browsing() {
                return Err(BridgeError::InvalidArgument(
                    PRIVATE_BROWSING_UNSUPPORTED.to_string(),
                ));
            }
            tracing::warn!("{PRIVATE_BROWSING_UNSUPPORTED}");
        }

        if options.enforces_thread_at_init() {
            gate.ensure_started(ThreadPreference::Current)?;
            self.inner.dispatcher.check_thread("init")?;
        } else if !gate.has_started() && gate.main_looper().is_current() {
            gate.ensure_started(ThreadPreference::Main)?;
        }

        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::InvalidArgument(
                "web view is already initialized".to_string(),
            ));
        }

        self.run_or_post("init", move |inner| {
            inner.create_contents()?;
            if private_browsing {
                inner.destroy_contents()?;
            }
            Ok(())
        })
    }

    pub fn settings(&self) -> WebSettings {
        self.inner.settings.clone()
    }

    pub fn set_web_view_client(&self, client: Option<Arc<dyn WebViewClient>>) {
        self.inner.client.set_web_view_client(client);
    }

    pub fn set_web_chrome_client(&self, client: Option<Arc<dyn WebChromeClient>>) {
        self.inner.client.set_web_chrome_client(client);
    }

    pub fn set_download_listener(&self, listener: Option<Arc<dyn DownloadListener>>) {
        self.inner.client.set_download_listener(listener);
    }

    pub fn set_find_listener(&self, listener: Option<Arc<dyn FindListener>>) {
        self.inner.client.set_find_listener(listener);
    }

    pub fn load_url(&self, url: &str) -> Result<()> {
        self.load_url_with_headers(url, HashMap::new())
    }

    pub fn load_url_with_headers(&self, url: &str, headers: HashMap<String, String>) -> Result<()> {
        if self.inner.gate.options().evaluates_javascript_urls() {
            if let Some(script) = url.strip_prefix(JAVASCRIPT_SCHEME) {
                self.inner.gate.ensure_started(ThreadPreference::Main)?;
                let script = script.to_string();
                return self.post_to_contents("load_url", move |contents| {
                    contents.evaluate_javascript_even_if_not_yet_navigated(&script)
                });
            }
        }
        self.load_url_on_engine_thread(
            "load_url",
            LoadUrlParams::new(url).with_extra_headers(headers),
        )
    }

    /// POST `post_data` to `url` as a url-encoded form.
    pub fn post_url(&self, url: &str, post_data: Vec<u8>) -> Result<()> {
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )]);
        self.load_url_on_engine_thread(
            "post_url",
            LoadUrlParams::http_post(url, post_data).with_extra_headers(headers),
        )
    }

    pub fn load_data(&self, data: &str, mime_type: Option<&str>, encoding: Option<&str>) -> Result<()> {
        let params = LoadUrlParams::data(
            data,
            fix_up_mime_type(mime_type),
            is_base64_encoded(encoding),
        );
        self.load_url_on_engine_thread("load_data", params)
    }

    /// Load `data` as if it came from `base_url`.
    ///
    /// Unless the base URL is itself a `data:` URL the payload is sent
    /// base64-encoded as UTF-8, whatever `encoding` says. Empty base and
    /// history URLs become `about:blank`.
    pub fn load_data_with_base_url(
        &self,
        base_url: Option<&str>,
        data: &str,
        mime_type: Option<&str>,
        encoding: Option<&str>,
        history_url: Option<&str>,
    ) -> Result<()> {
        let mime_type = fix_up_mime_type(mime_type);
        let base_url = fix_up_base_url(base_url);
        let history_url = fix_up_base_url(history_url);

        let params = if base_url.starts_with("data:") {
            let is_base64 = is_base64_encoded(encoding);
            let charset = if is_base64 { None } else { encoding };
            LoadUrlParams::data_with_base_url(
                data,
                mime_type,
                is_base64,
                Some(base_url),
                Some(history_url),
                charset,
            )
        } else {
            LoadUrlParams::data_with_base_url(
                &BASE64.encode(data.as_bytes()),
                mime_type,
                true,
                Some(base_url),
                Some(history_url),
                Some("utf-8"),
            )
        };

        // Data loads with a base URL are resolved by the renderer and never
        // report a page start, so report it here.
        self.inner.gate.ensure_started(ThreadPreference::Main)?;
        if let Some(looper) = self.inner.gate.engine_looper() {
            let client = Arc::clone(&self.inner.client);
            let started_url = base_url.to_string();
            looper.post(Box::new(move || client.on_page_started(&started_url)))?;
        }
        self.load_url_on_engine_thread("load_data_with_base_url", params)
    }

    fn load_url_on_engine_thread(&self, operation: &'static str, params: LoadUrlParams) -> Result<()> {
        self.inner.gate.ensure_started(ThreadPreference::Main)?;
        tracing::trace!(operation, url = %params.url, "loading");
        self.post_to_contents(operation, move |contents| contents.load_url(params))
    }

    /// Run `script` in the current page. Engine thread only.
    pub fn evaluate_javascript(&self, script: &str, callback: Option<ValueCallback>) -> Result<()> {
        self.inner.dispatcher.check_thread("evaluate_javascript")?;
        self.inner
            .with_contents("evaluate_javascript", |contents| {
                contents.evaluate_javascript(script, callback)
            })
    }

    pub fn stop_loading(&self) -> Result<()> {
        self.post_to_contents("stop_loading", |contents| contents.stop_loading())
    }

    pub fn reload(&self) -> Result<()> {
        self.post_to_contents("reload", |contents| contents.reload())
    }

    pub fn can_go_back(&self) -> Result<bool> {
        self.query("can_go_back", ThreadPreference::Main, |contents| contents.can_go_back())
    }

    pub fn go_back(&self) -> Result<()> {
        self.post_to_contents("go_back", |contents| contents.go_back())
    }

    pub fn can_go_forward(&self) -> Result<bool> {
        self.query("can_go_forward", ThreadPreference::Main, |contents| {
            contents.can_go_forward()
        })
    }

    pub fn go_forward(&self) -> Result<()> {
        self.post_to_contents("go_forward", |contents| contents.go_forward())
    }

    pub fn can_go_back_or_forward(&self, steps: i32) -> Result<bool> {
        self.query("can_go_back_or_forward", ThreadPreference::Main, move |contents| {
            contents.can_go_back_or_forward(steps)
        })
    }

    pub fn go_back_or_forward(&self, steps: i32) -> Result<()> {
        self.post_to_contents("go_back_or_forward", move |contents| {
            contents.go_back_or_forward(steps)
        })
    }

    pub fn url(&self) -> Result<Option<String>> {
        self.query("url", ThreadPreference::Main, |contents| contents.url())
    }

    pub fn original_url(&self) -> Result<Option<String>> {
        self.query("original_url", ThreadPreference::Main, |contents| {
            contents.original_url()
        })
    }

    pub fn title(&self) -> Result<Option<String>> {
        self.query("title", ThreadPreference::Main, |contents| contents.title())
    }

    // The size and progress getters read values the engine publishes and
    // may be called from any thread without starting the engine.

    pub fn progress(&self) -> u32 {
        self.inner.metrics.progress()
    }

    pub fn content_width(&self) -> u32 {
        self.inner.metrics.content_size().0
    }

    pub fn content_height(&self) -> u32 {
        self.inner.metrics.content_size().1
    }

    pub fn visible_title_height(&self) -> u32 {
        0
    }

    pub fn copy_back_forward_list(&self) -> Result<BackForwardList> {
        self.query("copy_back_forward_list", ThreadPreference::Main, |contents| {
            contents.back_forward_list()
        })
    }

    pub fn clear_history(&self) -> Result<()> {
        self.post_to_contents("clear_history", |contents| contents.clear_history())
    }

    pub fn clear_cache(&self, include_disk_files: bool) -> Result<()> {
        self.post_to_contents("clear_cache", move |contents| {
            contents.clear_cache(include_disk_files)
        })
    }

    pub fn pause_timers(&self) -> Result<()> {
        self.post_to_contents("pause_timers", |contents| contents.pause_timers())
    }

    pub fn resume_timers(&self) -> Result<()> {
        self.post_to_contents("resume_timers", |contents| contents.resume_timers())
    }

    pub fn on_pause(&self) -> Result<()> {
        self.post_to_contents("on_pause", |contents| contents.on_pause())
    }

    pub fn on_resume(&self) -> Result<()> {
        self.post_to_contents("on_resume", |contents| contents.on_resume())
    }

    pub fn set_network_available(&self, available: bool) -> Result<()> {
        self.post_to_contents("set_network_available", move |contents| {
            contents.set_network_available(available)
        })
    }

    /// Results arrive through the find listener.
    pub fn find_all_async(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.post_to_contents("find_all_async", move |contents| contents.find_all_async(&text))
    }

    pub fn find_next(&self, forward: bool) -> Result<()> {
        self.post_to_contents("find_next", move |contents| contents.find_next(forward))
    }

    pub fn clear_matches(&self) -> Result<()> {
        self.post_to_contents("clear_matches", |contents| contents.clear_matches())
    }

    pub fn set_http_auth_username_password(
        &self,
        host: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let (host, realm) = (host.to_string(), realm.to_string());
        let (username, password) = (username.to_string(), password.to_string());
        self.post_to_contents("set_http_auth_username_password", move |contents| {
            contents.set_http_auth_username_password(&host, &realm, &username, &password)
        })
    }

    pub fn http_auth_username_password(&self, host: &str, realm: &str) -> Result<Option<(String, String)>> {
        let (host, realm) = (host.to_string(), realm.to_string());
        self.query(
            "http_auth_username_password",
            ThreadPreference::Main,
            move |contents| contents.http_auth_username_password(&host, &realm),
        )
    }

    /// `None` when there is nothing worth saving.
    pub fn save_state(&self) -> Result<Option<SavedState>> {
        self.query("save_state", ThreadPreference::Main, |contents| contents.save_state())
    }

    /// The restored history, or `None` if `state` was rejected.
    pub fn restore_state(&self, state: &SavedState) -> Result<Option<BackForwardList>> {
        let state = state.clone();
        self.query("restore_state", ThreadPreference::Main, move |contents| {
            contents
                .restore_state(&state)
                .then(|| contents.back_forward_list())
        })
    }

    /// Deprecated, does nothing.
    pub fn save_password(&self, _host: &str, _username: &str, _password: &str) {}

    /// Deprecated, does nothing.
    pub fn set_certificate(&self, _certificate: Option<&str>) {}

    /// Engine thread only; binds the engine to the calling thread if it is
    /// not bound yet.
    pub fn set_layout_params(&self, width: u32, height: u32) -> Result<()> {
        self.inner.gate.ensure_started(ThreadPreference::Current)?;
        self.inner.dispatcher.check_thread("set_layout_params")?;
        self.inner
            .with_contents("set_layout_params", |contents| contents.on_size_changed(width, height))
    }

    pub fn on_attached_to_window(&self) -> Result<()> {
        self.inner.gate.ensure_started(ThreadPreference::Current)?;
        self.inner.dispatcher.check_thread("on_attached_to_window")?;
        self.inner
            .with_contents("on_attached_to_window", |contents| contents.on_attached_to_window())
    }

    /// Detach the contents and, when `view_root` is given, the draw functor.
    pub fn on_detached_from_window(&self, view_root: Option<Box<dyn ViewRoot + Send>>) -> Result<()> {
        self.run_or_post("on_detached_from_window", move |inner| {
            inner.with_contents("on_detached_from_window", |contents| {
                contents.on_detached_from_window()
            })?;
            match (view_root, inner.functor.lock().as_mut()) {
                (Some(mut view_root), Some(functor)) => functor.detach(&mut *view_root),
                _ => Ok(()),
            }
        })
    }

    /// Draw through the hardware functor. `Ok(false)` asks the caller to fall
    /// back to a software draw. Engine thread only.
    pub fn on_draw(&self, canvas: &mut dyn DrawCanvas) -> Result<bool> {
        self.inner.gate.ensure_started(ThreadPreference::Main)?;
        self.inner.dispatcher.check_thread("on_draw")?;
        match self.inner.functor.lock().as_mut() {
            Some(functor) => functor.request_draw(canvas),
            None => Ok(false),
        }
    }

    /// Release the engine contents and the draw functor.
    pub fn destroy(&self) -> Result<()> {
        self.run_or_post("destroy", |inner| inner.destroy_contents())
    }

    /// Move the parent's pending popup into `child`, or discard it when the
    /// application declined with `None`.
    pub(crate) fn complete_window_creation(&self, child: Option<WebView>) -> Result<()> {
        self.run_or_post("complete_window_creation", move |parent| {
            let popup = parent
                .with_contents("complete_window_creation", |contents| contents.take_pending_popup())?;
            match (child, popup) {
                (Some(child), Some(popup)) => child
                    .inner
                    .with_contents("complete_window_creation", |contents| contents.adopt_popup(popup)),
                (None, Some(popup)) => {
                    tracing::debug!(target_url = %popup.target_url, "popup declined");
                    Ok(())
                }
                (_, None) => {
                    tracing::warn!("window creation completed with no pending popup");
                    Ok(())
                }
            }
        })
    }

    // Fire-and-forget: queued before startup, posted from other threads,
    // inline on the engine thread where failures reach the caller.
    fn run_or_post(
        &self,
        operation: &'static str,
        f: impl FnOnce(&WebViewInner) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        if !self.inner.dispatcher.needs_post() {
            return f(&self.inner);
        }
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.post_or_run(operation, move || {
            if let Err(e) = f(&inner) {
                tracing::warn!(operation, error = %e, "deferred web view call failed");
            }
        })
    }

    fn post_to_contents(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn Contents) + Send + 'static,
    ) -> Result<()> {
        self.run_or_post(operation, move |inner| inner.with_contents(operation, f))
    }

    // Start the engine if needed, then answer from the engine thread.
    fn query<T: Send + 'static>(
        &self,
        operation: &'static str,
        preference: ThreadPreference,
        f: impl FnOnce(&mut dyn Contents) -> T + Send + 'static,
    ) -> Result<T> {
        self.inner.gate.ensure_started(preference)?;
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .call(operation, move || inner.with_contents(operation, f))?
    }
}

impl fmt::Debug for WebView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebView")
            .field("initialized", &self.inner.initialized.load(Ordering::Relaxed))
            .field("metrics", &self.inner.metrics)
            .finish()
    }
}

fn fix_up_mime_type(mime_type: Option<&str>) -> &str {
    mime_type.filter(|m| !m.is_empty()).unwrap_or("text/html")
}

fn fix_up_base_url(url: Option<&str>) -> &str {
    url.filter(|u| !u.is_empty()).unwrap_or("about:blank")
}

fn is_base64_encoded(encoding: Option<&str>) -> bool {
    encoding == Some("base64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WebChromeClient;
    use crate::headless::HeadlessEngine;
    use crate::looper::Looper;
    use crate::options::BridgeOptions;
    use crate::popup::{NewWindowRequest, PopupState};
    use pretty_assertions::assert_eq;

    /// Holds on to window requests until the test lets go of them.
    #[derive(Default)]
    struct HoldRequests(Mutex<Vec<NewWindowRequest>>);

    impl WebChromeClient for HoldRequests {
        fn on_create_window(
            &self,
            _view: &WebView,
            _is_dialog: bool,
            _is_user_gesture: bool,
            request: NewWindowRequest,
        ) -> bool {
            self.0.lock().push(request);
            true
        }
    }

    #[test]
    fn dropped_window_request_clears_the_pending_popup() {
        let mut looper = Looper::prepare().unwrap();
        let bridge = Bridge::new(Arc::new(HeadlessEngine::new()), looper.handle(), BridgeOptions::default());
        let parent = bridge.create_web_view();
        parent.init(false).unwrap();
        parent.settings().set_support_multiple_windows(true);
        parent.settings().set_javascript_can_open_windows_automatically(true);
        let holder = Arc::new(HoldRequests::default());
        parent.set_web_chrome_client(Some(holder.clone()));

        parent
            .evaluate_javascript("window.open('https://popup.test/')", None)
            .unwrap();
        looper.pump();

        let request = holder.0.lock().pop().unwrap();
        let tracker = request.tracker();
        assert_eq!(tracker.state(), PopupState::AwaitingTransport);
        drop(request);

        assert_eq!(
            tracker.transitions(),
            vec![
                PopupState::Requested,
                PopupState::AwaitingTransport,
                PopupState::Completed,
            ]
        );
        let pending = parent
            .inner
            .with_contents("pending_popup", |contents| contents.take_pending_popup().is_some())
            .unwrap();
        assert!(!pending);
    }

    #[test]
    fn fix_ups_fill_in_missing_values() {
        assert_eq!(fix_up_mime_type(None), "text/html");
        assert_eq!(fix_up_mime_type(Some("")), "text/html");
        assert_eq!(fix_up_mime_type(Some("text/plain")), "text/plain");
        assert_eq!(fix_up_base_url(Some("")), "about:blank");
        assert_eq!(fix_up_base_url(Some("https://a.test/")), "https://a.test/");
        assert!(is_base64_encoded(Some("base64")));
        assert!(!is_base64_encoded(Some("BASE64")));
        assert!(!is_base64_encoded(None));
    }

    #[test]
    fn empty_weak_reference_never_upgrades() {
        assert!(WeakWebView::new().upgrade().is_none());
        assert!(WeakWebView::default().upgrade().is_none());
    }
}
