//! Application callback interfaces and the adapter the engine calls into.
//!
//! Every callback runs on the engine thread. With no client registered the
//! adapter applies the documented fallbacks instead of failing: dialogs are
//! cancelled, geolocation is denied, popups are refused, and find results and
//! downloads are dropped.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::popup::NewWindowRequest;
use crate::replies::{
    FormResubmission, GeolocationCallback, HttpAuthHandler, JsPromptResult, JsResult, SslError,
    SslErrorHandler,
};
use crate::webview::{WeakWebView, WebView};

/// Android key codes the bridge treats specially.
pub mod keycode {
    pub const HOME: i32 = 3;
    pub const BACK: i32 = 4;
    pub const CALL: i32 = 5;
    pub const ENDCALL: i32 = 6;
    pub const VOLUME_UP: i32 = 24;
    pub const VOLUME_DOWN: i32 = 25;
    pub const POWER: i32 = 26;
    pub const CAMERA: i32 = 27;
    pub const HEADSETHOOK: i32 = 79;
    pub const FOCUS: i32 = 80;
    pub const MENU: i32 = 82;
    pub const VOLUME_MUTE: i32 = 164;

    pub(crate) const SYSTEM: [i32; 12] = [
        MENU,
        HOME,
        BACK,
        CALL,
        ENDCALL,
        POWER,
        HEADSETHOOK,
        CAMERA,
        FOCUS,
        VOLUME_DOWN,
        VOLUME_MUTE,
        VOLUME_UP,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_code: i32,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn new(key_code: i32, action: KeyAction) -> Self {
        Self { key_code, action }
    }

    /// Keys the system handles before the page sees them.
    pub fn is_system(&self) -> bool {
        keycode::SYSTEM.contains(&self.key_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Tip,
    Log,
    Warning,
    Error,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub message: String,
    pub source_id: String,
    pub line_number: u32,
    pub level: MessageLevel,
}

/// A response supplied by the application instead of loading from network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResourceResponse {
    pub mime_type: String,
    pub encoding: String,
    pub data: Vec<u8>,
}

/// Load error codes reported through [`WebViewClient::on_received_error`].
pub mod error_code {
    pub const UNKNOWN: i32 = -1;
    pub const HOST_LOOKUP: i32 = -2;
    pub const UNSUPPORTED_AUTH_SCHEME: i32 = -3;
    pub const AUTHENTICATION: i32 = -4;
    pub const PROXY_AUTHENTICATION: i32 = -5;
    pub const CONNECT: i32 = -6;
    pub const IO: i32 = -7;
    pub const TIMEOUT: i32 = -8;
    pub const REDIRECT_LOOP: i32 = -9;
    pub const UNSUPPORTED_SCHEME: i32 = -10;
    pub const FAILED_SSL_HANDSHAKE: i32 = -11;
    pub const BAD_URL: i32 = -12;
    pub const FILE: i32 = -13;
    pub const FILE_NOT_FOUND: i32 = -14;
    pub const TOO_MANY_REQUESTS: i32 = -15;
}

/// Human readable description of a load error code.
pub fn error_string(code: i32) -> &'static str {
    match code {
        error_code::UNKNOWN => "Unknown error.",
        error_code::HOST_LOOKUP => "The URL could not be found.",
        error_code::UNSUPPORTED_AUTH_SCHEME => "The site authentication scheme isn't supported.",
        error_code::AUTHENTICATION => "Couldn't authenticate.",
        error_code::PROXY_AUTHENTICATION => "Authentication via the proxy server was unsuccessful.",
        error_code::CONNECT => "Couldn't connect to the server.",
        error_code::IO => "Couldn't communicate with the server. Try again later.",
        error_code::TIMEOUT => "The connection to the server timed out.",
        error_code::REDIRECT_LOOP => "The page contains too many server redirects.",
        error_code::UNSUPPORTED_SCHEME => "The protocol isn't supported.",
        error_code::FAILED_SSL_HANDSHAKE => "Couldn't establish a secure connection.",
        error_code::BAD_URL => "The page couldn't be opened because the URL is invalid.",
        error_code::FILE => "Couldn't access the file.",
        error_code::FILE_NOT_FOUND => "The requested file wasn't found.",
        error_code::TOO_MANY_REQUESTS => "Too many requests are being processed. Try again later.",
        _ => "unknown error",
    }
}

/// Navigation and content events. Every method has a default so clients
/// only implement what they care about.
#[allow(unused_variables)]
pub trait WebViewClient: Send + Sync {
    fn should_override_url_loading(&self, view: &WebView, url: &str) -> bool {
        false
    }

    fn on_page_started(&self, view: &WebView, url: &str) {}

    fn on_page_finished(&self, view: &WebView, url: &str) {}

    fn on_load_resource(&self, view: &WebView, url: &str) {}

    fn should_intercept_request(&self, view: &WebView, url: &str) -> Option<WebResourceResponse> {
        None
    }

    fn on_received_error(&self, view: &WebView, error_code: i32, description: &str, failing_url: &str) {}

    fn do_update_visited_history(&self, view: &WebView, url: &str, is_reload: bool) {}

    fn on_form_resubmission(&self, view: &WebView, resubmission: FormResubmission) {
        resubmission.dont_resend();
    }

    fn on_received_http_auth_request(
        &self,
        view: &WebView,
        handler: HttpAuthHandler,
        host: &str,
        realm: &str,
    ) {
        handler.cancel();
    }

    fn on_received_ssl_error(&self, view: &WebView, handler: SslErrorHandler, error: &SslError) {
        handler.cancel();
    }

    fn on_received_login_request(&self, view: &WebView, realm: &str, account: Option<&str>, args: &str) {}

    fn should_override_key_event(&self, view: &WebView, event: &KeyEvent) -> bool {
        false
    }

    fn on_unhandled_key_event(&self, view: &WebView, event: &KeyEvent) {}

    fn on_scale_changed(&self, view: &WebView, old_scale: f32, new_scale: f32) {}
}

/// The client in effect when the application has not set one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWebViewClient;

impl WebViewClient for NullWebViewClient {
    fn should_override_key_event(&self, _view: &WebView, event: &KeyEvent) -> bool {
        keycode::SYSTEM.contains(&event.key_code)
    }
}

/// Browser-chrome events: dialogs, titles, progress, windows.
#[allow(unused_variables)]
pub trait WebChromeClient: Send + Sync {
    fn on_progress_changed(&self, view: &WebView, progress: u32) {}

    fn on_received_title(&self, view: &WebView, title: &str) {}

    fn on_received_touch_icon_url(&self, view: &WebView, url: &str, precomposed: bool) {}

    /// Return `true` when `request` was (or will be) answered.
    fn on_create_window(
        &self,
        view: &WebView,
        is_dialog: bool,
        is_user_gesture: bool,
        request: NewWindowRequest,
    ) -> bool {
        false
    }

    fn on_close_window(&self, view: &WebView) {}

    fn on_request_focus(&self, view: &WebView) {}

    fn on_console_message(&self, message: &ConsoleMessage) -> bool {
        false
    }

    /// Return the result back when the dialog was not handled.
    fn on_js_alert(&self, view: &WebView, url: &str, message: &str, result: JsResult) -> Option<JsResult> {
        Some(result)
    }

    fn on_js_confirm(&self, view: &WebView, url: &str, message: &str, result: JsResult) -> Option<JsResult> {
        Some(result)
    }

    fn on_js_before_unload(
        &self,
        view: &WebView,
        url: &str,
        message: &str,
        result: JsResult,
    ) -> Option<JsResult> {
        Some(result)
    }

    fn on_js_prompt(
        &self,
        view: &WebView,
        url: &str,
        message: &str,
        default_value: &str,
        result: JsPromptResult,
    ) -> Option<JsPromptResult> {
        Some(result)
    }

    fn on_geolocation_permissions_show_prompt(&self, origin: &str, callback: GeolocationCallback) {}

    fn on_geolocation_permissions_hide_prompt(&self) {}
}

pub trait DownloadListener: Send + Sync {
    fn on_download_start(
        &self,
        url: &str,
        user_agent: &str,
        content_disposition: &str,
        mime_type: &str,
        content_length: i64,
    );
}

pub trait FindListener: Send + Sync {
    fn on_find_result_received(&self, active_match_ordinal: u32, number_of_matches: u32, is_done_counting: bool);
}

/// The chrome client registered on a view.
#[derive(Clone, Default)]
pub enum ChromeClientSlot {
    #[default]
    Unset,
    Attached(Arc<dyn WebChromeClient>),
}

impl ChromeClientSlot {
    pub fn from_client(client: Option<Arc<dyn WebChromeClient>>) -> Self {
        client.map_or(ChromeClientSlot::Unset, ChromeClientSlot::Attached)
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, ChromeClientSlot::Attached(_))
    }
}

/// Routes engine callbacks to whatever the application registered.
///
/// Holds the view weakly; once the view is gone callbacks fall back to the
/// unregistered behaviour.
pub struct ContentsClientAdapter {
    web_view: WeakWebView,
    web_view_client: RwLock<Arc<dyn WebViewClient>>,
    chrome_client: RwLock<ChromeClientSlot>,
    download_listener: RwLock<Option<Arc<dyn DownloadListener>>>,
    find_listener: RwLock<Option<Arc<dyn FindListener>>>,
}

impl ContentsClientAdapter {
    pub fn new(web_view: WeakWebView) -> Self {
        Self {
            web_view,
            web_view_client: RwLock::new(Arc::new(NullWebViewClient)),
            chrome_client: RwLock::new(ChromeClientSlot::Unset),
            download_listener: RwLock::new(None),
            find_listener: RwLock::new(None),
        }
    }

    pub fn set_web_view_client(&self, client: Option<Arc<dyn WebViewClient>>) {
        *self.web_view_client.write() = client.unwrap_or_else(|| Arc::new(NullWebViewClient));
    }

    pub fn set_web_chrome_client(&self, client: Option<Arc<dyn WebChromeClient>>) {
        *self.chrome_client.write() = ChromeClientSlot::from_client(client);
    }

    pub fn set_download_listener(&self, listener: Option<Arc<dyn DownloadListener>>) {
        *self.download_listener.write() = listener;
    }

    pub fn set_find_listener(&self, listener: Option<Arc<dyn FindListener>>) {
        *self.find_listener.write() = listener;
    }

    pub fn has_chrome_client(&self) -> bool {
        self.chrome_client.read().is_attached()
    }

    // Clients are cloned out of their locks so a callback may replace them.
    fn client(&self) -> Arc<dyn WebViewClient> {
        self.web_view_client.read().clone()
    }

    fn chrome(&self) -> Option<Arc<dyn WebChromeClient>> {
        match &*self.chrome_client.read() {
            ChromeClientSlot::Unset => None,
            ChromeClientSlot::Attached(client) => Some(client.clone()),
        }
    }

    fn view(&self, callback: &str) -> Option<WebView> {
        let view = self.web_view.upgrade();
        if view.is_none() {
            tracing::debug!(callback, "web view already dropped, skipping callback");
        }
        view
    }

    pub fn should_override_url_loading(&self, url: &str) -> bool {
        let Some(view) = self.view("should_override_url_loading") else {
            return false;
        };
        tracing::trace!(url, "should_override_url_loading");
        self.client().should_override_url_loading(&view, url)
    }

    pub fn should_intercept_request(&self, url: &str) -> Option<WebResourceResponse> {
        let view = self.view("should_intercept_request")?;
        self.client().should_intercept_request(&view, url)
    }

    pub fn on_page_started(&self, url: &str) {
        if let Some(view) = self.view("on_page_started") {
            tracing::trace!(url, "on_page_started");
            self.client().on_page_started(&view, url);
        }
    }

    pub fn on_page_finished(&self, url: &str) {
        if let Some(view) = self.view("on_page_finished") {
            tracing::trace!(url, "on_page_finished");
            self.client().on_page_finished(&view, url);
        }
    }

    pub fn on_load_resource(&self, url: &str) {
        if let Some(view) = self.view("on_load_resource") {
            self.client().on_load_resource(&view, url);
        }
    }

    /// An empty description is replaced by the text for `error_code`.
    pub fn on_received_error(&self, error_code: i32, description: Option<&str>, failing_url: &str) {
        let Some(view) = self.view("on_received_error") else {
            return;
        };
        let description = description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| error_string(error_code));
        tracing::trace!(error_code, failing_url, "on_received_error");
        self.client()
            .on_received_error(&view, error_code, description, failing_url);
    }

    pub fn do_update_visited_history(&self, url: &str, is_reload: bool) {
        if let Some(view) = self.view("do_update_visited_history") {
            self.client().do_update_visited_history(&view, url, is_reload);
        }
    }

    pub fn on_form_resubmission(&self, resubmission: FormResubmission) {
        if let Some(view) = self.view("on_form_resubmission") {
            self.client().on_form_resubmission(&view, resubmission);
        }
    }

    pub fn on_received_http_auth_request(&self, handler: HttpAuthHandler, host: &str, realm: &str) {
        if let Some(view) = self.view("on_received_http_auth_request") {
            tracing::trace!(host, realm, "on_received_http_auth_request");
            self.client()
                .on_received_http_auth_request(&view, handler, host, realm);
        }
    }

    pub fn on_received_ssl_error(&self, handler: SslErrorHandler, error: &SslError) {
        if let Some(view) = self.view("on_received_ssl_error") {
            self.client().on_received_ssl_error(&view, handler, error);
        }
    }

    pub fn on_received_login_request(&self, realm: &str, account: Option<&str>, args: &str) {
        if let Some(view) = self.view("on_received_login_request") {
            self.client()
                .on_received_login_request(&view, realm, account, args);
        }
    }

    /// System keys are always overridden before the client is asked.
    pub fn should_override_key_event(&self, event: &KeyEvent) -> bool {
        if event.is_system() {
            return true;
        }
        let Some(view) = self.view("should_override_key_event") else {
            return false;
        };
        self.client().should_override_key_event(&view, event)
    }

    pub fn on_unhandled_key_event(&self, event: &KeyEvent) {
        if let Some(view) = self.view("on_unhandled_key_event") {
            self.client().on_unhandled_key_event(&view, event);
        }
    }

    pub fn on_scale_changed(&self, old_scale: f32, new_scale: f32) {
        if let Some(view) = self.view("on_scale_changed") {
            self.client().on_scale_changed(&view, old_scale, new_scale);
        }
    }

    pub fn on_progress_changed(&self, progress: u32) {
        if let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_progress_changed")) {
            chrome.on_progress_changed(&view, progress);
        }
    }

    pub fn on_received_title(&self, title: &str) {
        if let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_received_title")) {
            chrome.on_received_title(&view, title);
        }
    }

    pub fn on_received_touch_icon_url(&self, url: &str, precomposed: bool) {
        if let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_received_touch_icon_url")) {
            chrome.on_received_touch_icon_url(&view, url, precomposed);
        }
    }

    /// `false` refuses the popup. A request nobody keeps declines on drop.
    pub fn on_create_window(&self, is_dialog: bool, is_user_gesture: bool) -> bool {
        let Some(view) = self.view("on_create_window") else {
            return false;
        };
        let mut request = NewWindowRequest::new(view.clone());
        let Some(chrome) = self.chrome() else {
            return false;
        };
        request.hand_to_application();
        tracing::trace!(is_dialog, is_user_gesture, "on_create_window");
        chrome.on_create_window(&view, is_dialog, is_user_gesture, request)
    }

    pub fn on_close_window(&self) {
        if let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_close_window")) {
            chrome.on_close_window(&view);
        }
    }

    pub fn on_request_focus(&self) {
        if let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_request_focus")) {
            chrome.on_request_focus(&view);
        }
    }

    pub fn on_console_message(&self, message: &ConsoleMessage) -> bool {
        let Some(chrome) = self.chrome() else {
            return false;
        };
        let handled = chrome.on_console_message(message);
        if handled && message.message.starts_with("[blocked]") {
            tracing::error!(message = %message.message, "blocked URL");
        }
        handled
    }

    pub fn handle_js_alert(&self, url: &str, message: &str, result: JsResult) {
        self.js_dialog("alert", result, |chrome, view, result| {
            chrome.on_js_alert(view, url, message, result)
        });
    }

    pub fn handle_js_confirm(&self, url: &str, message: &str, result: JsResult) {
        self.js_dialog("confirm", result, |chrome, view, result| {
            chrome.on_js_confirm(view, url, message, result)
        });
    }

    pub fn handle_js_before_unload(&self, url: &str, message: &str, result: JsResult) {
        self.js_dialog("before_unload", result, |chrome, view, result| {
            chrome.on_js_before_unload(view, url, message, result)
        });
    }

    pub fn handle_js_prompt(&self, url: &str, message: &str, default_value: &str, result: JsPromptResult) {
        let (Some(chrome), Some(view)) = (self.chrome(), self.view("on_js_prompt")) else {
            result.cancel();
            return;
        };
        if let Some(unhandled) = chrome.on_js_prompt(&view, url, message, default_value, result) {
            tracing::debug!(url, "prompt not handled by the chrome client, cancelling");
            unhandled.cancel();
        }
    }

    // Without a dialog host an unhandled dialog is cancelled.
    fn js_dialog(
        &self,
        kind: &'static str,
        result: JsResult,
        show: impl FnOnce(&dyn WebChromeClient, &WebView, JsResult) -> Option<JsResult>,
    ) {
        let (Some(chrome), Some(view)) = (self.chrome(), self.view(kind)) else {
            result.cancel();
            return;
        };
        if let Some(unhandled) = show(chrome.as_ref(), &view, result) {
            tracing::debug!(kind, "dialog not handled by the chrome client, cancelling");
            unhandled.cancel();
        }
    }

    /// Without a chrome client the request is denied.
    pub fn on_geolocation_permissions_show_prompt(&self, callback: GeolocationCallback) {
        match self.chrome() {
            Some(chrome) => {
                let origin = callback.origin().to_string();
                chrome.on_geolocation_permissions_show_prompt(&origin, callback);
            }
            None => callback.invoke(false, false),
        }
    }

    pub fn on_geolocation_permissions_hide_prompt(&self) {
        if let Some(chrome) = self.chrome() {
            chrome.on_geolocation_permissions_hide_prompt();
        }
    }

    pub fn on_download_start(
        &self,
        url: &str,
        user_agent: &str,
        content_disposition: &str,
        mime_type: &str,
        content_length: i64,
    ) {
        let listener = self.download_listener.read().clone();
        match listener {
            Some(listener) => listener.on_download_start(
                url,
                user_agent,
                content_disposition,
                mime_type,
                content_length,
            ),
            None => tracing::debug!(url, "no download listener, dropping download"),
        }
    }

    pub fn on_find_result_received(&self, active_match_ordinal: u32, number_of_matches: u32, is_done_counting: bool) {
        let listener = self.find_listener.read().clone();
        if let Some(listener) = listener {
            listener.on_find_result_received(active_match_ordinal, number_of_matches, is_done_counting);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replies::GeolocationDecision;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn detached_adapter() -> ContentsClientAdapter {
        ContentsClientAdapter::new(WeakWebView::new())
    }

    #[test]
    fn system_keys_are_always_overridden() {
        let adapter = detached_adapter();
        assert!(adapter.should_override_key_event(&KeyEvent::new(keycode::BACK, KeyAction::Down)));
        assert!(adapter.should_override_key_event(&KeyEvent::new(keycode::VOLUME_MUTE, KeyAction::Up)));
        // 29 is KEYCODE_A
        assert!(!adapter.should_override_key_event(&KeyEvent::new(29, KeyAction::Down)));
    }

    #[test]
    fn error_descriptions_cover_every_code() {
        for code in error_code::TOO_MANY_REQUESTS..=error_code::UNKNOWN {
            assert_ne!(error_string(code), "unknown error", "code {code}");
        }
        assert_eq!(error_string(-99), "unknown error");
    }

    #[test]
    fn dialogs_without_chrome_client_are_cancelled() {
        let adapter = detached_adapter();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        adapter.handle_js_confirm("https://a.test", "sure?", JsResult::new(move |ok| sink.lock().push(ok)));
        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn geolocation_is_denied_without_chrome_client() {
        let adapter = detached_adapter();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        adapter.on_geolocation_permissions_show_prompt(GeolocationCallback::new(
            "https://maps.test",
            move |d| *sink.lock() = Some(d),
        ));
        assert_eq!(*seen.lock(), Some(GeolocationDecision { allow: false, retain: false }));
    }

    #[test]
    fn popups_are_refused_without_chrome_client() {
        assert!(!detached_adapter().on_create_window(false, true));
    }

    struct CountingFind(Mutex<Vec<(u32, u32, bool)>>);

    impl FindListener for CountingFind {
        fn on_find_result_received(&self, active: u32, total: u32, done: bool) {
            self.0.lock().push((active, total, done));
        }
    }

    #[test]
    fn find_results_reach_the_listener_unchanged() {
        let adapter = detached_adapter();
        adapter.on_find_result_received(0, 3, true);
        let listener = Arc::new(CountingFind(Mutex::new(Vec::new())));
        adapter.set_find_listener(Some(listener.clone()));
        adapter.on_find_result_received(1, 3, false);
        assert_eq!(*listener.0.lock(), vec![(1, 3, false)]);
    }
}
