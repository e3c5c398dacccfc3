//! The outbound engine surface.
//!
//! An [`Engine`] is the externally supplied browser engine; [`Contents`] is
//! one page host inside it. The bridge only ever calls into a `Contents` from
//! the engine thread, and engines must deliver client callbacks as separate
//! engine-thread tasks rather than from inside a `Contents` method.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::client::ContentsClientAdapter;
use crate::draw_functor::{FunctorHandle, PlatformFeatures};
use crate::error::Result;
use crate::services::{BrowserContext, CookieStore, GeolocationStore, WebStorage};
use crate::settings::EngineSettings;

/// Callback receiving the JSON-encoded result of a script evaluation.
pub type ValueCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// The browser engine behind the bridge.
pub trait Engine: Send + Sync {
    /// One-time startup work, run on the engine thread under the bootstrap
    /// lock. Must not call back into the bridge.
    fn start(&self) -> Result<()>;

    fn create_contents(&self, init: ContentsInit) -> Result<Box<dyn Contents>>;

    fn default_user_agent(&self) -> String;

    /// Cookie storage is usable before the engine has started.
    fn create_cookie_store(&self) -> Arc<dyn CookieStore>;

    fn create_web_storage(&self) -> Arc<dyn WebStorage>;

    fn create_geolocation_store(&self) -> Arc<dyn GeolocationStore>;

    fn platform_features(&self) -> PlatformFeatures;

    fn create_draw_functor(&self) -> FunctorHandle;

    fn destroy_draw_functor(&self, functor: FunctorHandle);
}

/// Everything a new `Contents` is wired to.
pub struct ContentsInit {
    pub browser_context: Arc<BrowserContext>,
    pub client: Arc<ContentsClientAdapter>,
    pub settings: Arc<Mutex<EngineSettings>>,
    pub metrics: Arc<ContentMetrics>,
}

/// A single page host inside the engine.
pub trait Contents: Send {
    fn load_url(&mut self, params: LoadUrlParams);
    fn evaluate_javascript(&mut self, script: &str, callback: Option<ValueCallback>);
    fn evaluate_javascript_even_if_not_yet_navigated(&mut self, script: &str);
    fn stop_loading(&mut self);
    fn reload(&mut self);

    fn can_go_back(&self) -> bool;
    fn go_back(&mut self);
    fn can_go_forward(&self) -> bool;
    fn go_forward(&mut self);
    fn can_go_back_or_forward(&self, steps: i32) -> bool;
    fn go_back_or_forward(&mut self, steps: i32);

    fn url(&self) -> Option<String>;
    fn original_url(&self) -> Option<String>;
    fn title(&self) -> Option<String>;
    fn back_forward_list(&self) -> BackForwardList;
    fn clear_history(&mut self);
    fn clear_cache(&mut self, include_disk_files: bool);

    fn pause_timers(&mut self);
    fn resume_timers(&mut self);
    fn on_pause(&mut self);
    fn on_resume(&mut self);
    fn set_network_available(&mut self, available: bool);

    fn find_all_async(&mut self, text: &str);
    fn find_next(&mut self, forward: bool);
    fn clear_matches(&mut self);

    fn set_http_auth_username_password(
        &mut self,
        host: &str,
        realm: &str,
        username: &str,
        password: &str,
    );
    fn http_auth_username_password(&self, host: &str, realm: &str) -> Option<(String, String)>;

    fn save_state(&self) -> Option<SavedState>;
    fn restore_state(&mut self, state: &SavedState) -> bool;

    fn on_attached_to_window(&mut self);
    fn on_detached_from_window(&mut self);
    fn on_size_changed(&mut self, width: u32, height: u32);

    /// Hand out the popup created by the last new-window request, if any.
    fn take_pending_popup(&mut self) -> Option<PendingPopup>;
    /// Become the host of a popup taken from another contents.
    fn adopt_popup(&mut self, popup: PendingPopup);

    fn destroy(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadType {
    Default,
    HttpPost,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadUrlParams {
    pub url: String,
    pub load_type: LoadType,
    pub extra_headers: HashMap<String, String>,
    pub post_data: Option<Vec<u8>>,
    pub base_url: Option<String>,
    pub history_url: Option<String>,
}

impl LoadUrlParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            load_type: LoadType::Default,
            extra_headers: HashMap::new(),
            post_data: None,
            base_url: None,
            history_url: None,
        }
    }

    pub fn http_post(url: impl Into<String>, post_data: Vec<u8>) -> Self {
        let mut params = Self::new(url);
        params.load_type = LoadType::HttpPost;
        params.post_data = Some(post_data);
        params
    }

    /// `data:` URL carrying `data` directly.
    pub fn data(data: &str, mime_type: &str, is_base64: bool) -> Self {
        Self::data_with_base_url(data, mime_type, is_base64, None, None, None)
    }

    /// `data:` URL resolved against `base_url`, recorded in history as
    /// `history_url`.
    pub fn data_with_base_url(
        data: &str,
        mime_type: &str,
        is_base64: bool,
        base_url: Option<&str>,
        history_url: Option<&str>,
        charset: Option<&str>,
    ) -> Self {
        let mut url = format!("data:{mime_type}");
        if let Some(charset) = charset.filter(|c| !c.is_empty()) {
            url.push_str(";charset=");
            url.push_str(charset);
        }
        if is_base64 {
            url.push_str(";base64");
        }
        url.push(',');
        url.push_str(data);

        let mut params = Self::new(url);
        params.load_type = LoadType::Data;
        params.base_url = base_url.map(str::to_string);
        params.history_url = history_url.map(str::to_string);
        params
    }

    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub url: String,
    pub original_url: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackForwardList {
    pub items: Vec<HistoryItem>,
    pub current_index: Option<usize>,
}

impl BackForwardList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_item(&self) -> Option<&HistoryItem> {
        self.current_index.and_then(|i| self.items.get(i))
    }

    pub fn item(&self, index: usize) -> Option<&HistoryItem> {
        self.items.get(index)
    }
}

/// Opaque persisted navigation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub history: BackForwardList,
}

impl SavedState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A popup window created by the page, waiting for a host view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPopup {
    pub target_url: String,
    pub is_dialog: bool,
    pub is_user_gesture: bool,
}

/// Values the engine publishes for lock-free reads from any thread.
pub struct ContentMetrics {
    progress: AtomicU32,
    content_width: AtomicU32,
    content_height: AtomicU32,
}

impl ContentMetrics {
    pub fn new() -> Self {
        Self {
            progress: AtomicU32::new(100),
            content_width: AtomicU32::new(0),
            content_height: AtomicU32::new(0),
        }
    }

    pub fn progress(&self) -> u32 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, progress: u32) {
        self.progress.store(progress.min(100), Ordering::Relaxed);
    }

    pub fn content_size(&self) -> (u32, u32) {
        (
            self.content_width.load(Ordering::Relaxed),
            self.content_height.load(Ordering::Relaxed),
        )
    }

    pub fn set_content_size(&self, width: u32, height: u32) {
        self.content_width.store(width, Ordering::Relaxed);
        self.content_height.store(height, Ordering::Relaxed);
    }
}

impl Default for ContentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContentMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.content_size();
        f.debug_struct("ContentMetrics")
            .field("progress", &self.progress())
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_url_with_charset_and_base64() {
        let params = LoadUrlParams::data_with_base_url(
            "PGgxPkhpPC9oMT4=",
            "text/html",
            true,
            Some("https://example.com/"),
            Some("about:blank"),
            Some("utf-8"),
        );
        assert_eq!(
            params.url,
            "data:text/html;charset=utf-8;base64,PGgxPkhpPC9oMT4="
        );
        assert_eq!(params.load_type, LoadType::Data);
        assert_eq!(params.base_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn plain_data_url_has_no_parameters() {
        let params = LoadUrlParams::data("<p>x</p>", "text/html", false);
        assert_eq!(params.url, "data:text/html,<p>x</p>");
        assert_eq!(params.base_url, None);
    }

    #[test]
    fn metrics_clamp_progress() {
        let metrics = ContentMetrics::new();
        assert_eq!(metrics.progress(), 100);
        metrics.set_progress(250);
        assert_eq!(metrics.progress(), 100);
        metrics.set_progress(40);
        assert_eq!(metrics.progress(), 40);
    }

    #[test]
    fn saved_state_survives_json() {
        let state = SavedState {
            history: BackForwardList {
                items: vec![HistoryItem {
                    url: "https://a.test/".into(),
                    original_url: "https://a.test/".into(),
                    title: "A".into(),
                }],
                current_index: Some(0),
            },
        };
        let json = state.to_json().unwrap();
        assert_eq!(SavedState::from_json(&json).unwrap(), state);
    }
}
