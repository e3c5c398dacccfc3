//! An in-memory engine with no network and no renderer.
//!
//! Pages are whatever the load carried: `data:` payloads are decoded and
//! searched, everything else is an empty document titled after its URL.
//! Scripts understand a handful of expressions (`document.title`,
//! `location.href`, literals, `alert`, `confirm` and `window.open`).
//! Client callbacks are posted to the engine looper as separate tasks, never
//! invoked from inside a contents call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;

use crate::client::{error_code, ContentsClientAdapter};
use crate::contents::{
    BackForwardList, ContentMetrics, Contents, ContentsInit, Engine, HistoryItem, LoadType,
    LoadUrlParams, PendingPopup, SavedState, ValueCallback,
};
use crate::draw_functor::{FunctorHandle, PlatformFeatures};
use crate::error::{BridgeError, Result};
use crate::looper::LooperHandle;
use crate::replies::JsResult;
use crate::services::{
    CookieStore, GeolocationStore, InMemoryCookieStore, InMemoryGeolocationStore,
    InMemoryWebStorage, WebStorage,
};
use crate::settings::EngineSettings;

pub const HEADLESS_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 5.0) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Headless";

const LINE_HEIGHT: u32 = 16;

type StartupHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

pub struct HeadlessEngine {
    startup: Option<StartupHook>,
    starts: AtomicUsize,
    features: PlatformFeatures,
    user_agent: String,
    next_functor: AtomicU64,
    live_functors: Mutex<HashSet<FunctorHandle>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self {
            startup: None,
            starts: AtomicUsize::new(0),
            features: PlatformFeatures::default(),
            user_agent: HEADLESS_USER_AGENT.to_string(),
            next_functor: AtomicU64::new(1),
            live_functors: Mutex::new(HashSet::new()),
        }
    }

    /// Run `hook` as the engine's startup work.
    pub fn with_startup(mut self, hook: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.startup = Some(Box::new(hook));
        self
    }

    pub fn with_platform_features(mut self, features: PlatformFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// How many times startup work has run.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Draw functors created and not yet destroyed.
    pub fn live_functors(&self) -> usize {
        self.live_functors.lock().len()
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for HeadlessEngine {
    fn start(&self) -> Result<()> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(attempt, "starting headless engine");
        match &self.startup {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn create_contents(&self, init: ContentsInit) -> Result<Box<dyn Contents>> {
        let looper = LooperHandle::current().ok_or(BridgeError::NotStarted {
            operation: "create_contents",
        })?;
        Ok(Box::new(HeadlessContents::new(init, looper)))
    }

    fn default_user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn create_cookie_store(&self) -> Arc<dyn CookieStore> {
        Arc::new(InMemoryCookieStore::new())
    }

    fn create_web_storage(&self) -> Arc<dyn WebStorage> {
        Arc::new(InMemoryWebStorage::default())
    }

    fn create_geolocation_store(&self) -> Arc<dyn GeolocationStore> {
        Arc::new(InMemoryGeolocationStore::default())
    }

    fn platform_features(&self) -> PlatformFeatures {
        self.features
    }

    fn create_draw_functor(&self) -> FunctorHandle {
        let handle = FunctorHandle(self.next_functor.fetch_add(1, Ordering::SeqCst));
        self.live_functors.lock().insert(handle);
        handle
    }

    fn destroy_draw_functor(&self, functor: FunctorHandle) {
        if !self.live_functors.lock().remove(&functor) {
            tracing::warn!(?functor, "destroying unknown draw functor");
        }
    }
}

struct Page {
    item: HistoryItem,
    body: String,
}

#[derive(Default)]
struct FindSession {
    matches: u32,
    active: u32,
}

struct HeadlessContents {
    client: Arc<ContentsClientAdapter>,
    settings: Arc<Mutex<EngineSettings>>,
    metrics: Arc<ContentMetrics>,
    looper: LooperHandle,
    pages: Vec<Page>,
    index: Option<usize>,
    width: u32,
    find: Option<FindSession>,
    auth: HashMap<(String, String), (String, String)>,
    pending_popup: Option<PendingPopup>,
    timers_paused: bool,
    paused: bool,
    network_available: bool,
    attached: bool,
    destroyed: bool,
}

impl HeadlessContents {
    fn new(init: ContentsInit, looper: LooperHandle) -> Self {
        Self {
            client: init.client,
            settings: init.settings,
            metrics: init.metrics,
            looper,
            pages: Vec::new(),
            index: None,
            width: 0,
            find: None,
            auth: HashMap::new(),
            pending_popup: None,
            timers_paused: false,
            paused: false,
            network_available: true,
            attached: false,
            destroyed: false,
        }
    }

    fn post(&self, callback: impl FnOnce(&ContentsClientAdapter) + Send + 'static) {
        let client = Arc::clone(&self.client);
        if let Err(e) = self.looper.post(Box::new(move || callback(&client))) {
            tracing::debug!(error = %e, "engine loop gone, dropping client callback");
        }
    }

    fn current(&self) -> Option<&Page> {
        self.index.and_then(|i| self.pages.get(i))
    }

    fn current_url(&self) -> String {
        self.current()
            .map(|page| page.item.url.clone())
            .unwrap_or_else(|| "about:blank".to_string())
    }

    fn publish_metrics(&self) {
        let lines = self
            .current()
            .map_or(0, |page| page.body.lines().count() as u32);
        self.metrics.set_content_size(self.width, lines * LINE_HEIGHT);
        self.metrics.set_progress(100);
    }

    fn navigate_to(&mut self, index: usize) {
        self.index = Some(index);
        self.find = None;
        self.publish_metrics();
        if let Some(page) = self.current() {
            let (url, title) = (page.item.url.clone(), page.item.title.clone());
            self.post(move |client| {
                client.on_received_title(&title);
                client.on_page_finished(&url);
            });
        }
    }

    fn target_index(&self, steps: i32) -> Option<usize> {
        let target = self.index? as i64 + i64::from(steps);
        (0..self.pages.len() as i64)
            .contains(&target)
            .then_some(target as usize)
    }

    fn open_window(&mut self, url: String) {
        let (can_open, multiple_windows) = {
            let settings = self.settings.lock();
            (
                settings.javascript_can_open_windows_automatically,
                settings.support_multiple_windows,
            )
        };
        if !can_open {
            tracing::debug!(url, "window.open blocked by settings");
            return;
        }
        if !multiple_windows {
            self.load_url(LoadUrlParams::new(url));
            return;
        }
        self.pending_popup = Some(PendingPopup {
            target_url: url,
            is_dialog: false,
            is_user_gesture: false,
        });
        self.post(|client| {
            if !client.on_create_window(false, false) {
                tracing::debug!("popup refused by the application");
            }
        });
    }

    fn report_find_result(&self) {
        let (active, matches) = self
            .find
            .as_ref()
            .map_or((0, 0), |find| (find.active, find.matches));
        self.post(move |client| client.on_find_result_received(active, matches, true));
    }
}

impl Contents for HeadlessContents {
    fn load_url(&mut self, params: LoadUrlParams) {
        if self.destroyed {
            tracing::debug!(url = %params.url, "load on destroyed contents ignored");
            return;
        }
        let is_network = params.url.starts_with("http:") || params.url.starts_with("https:");
        if is_network && self.settings.lock().block_network_loads {
            let url = params.url;
            self.post(move |client| client.on_received_error(error_code::CONNECT, None, &url));
            return;
        }

        let reports_start = !(params.load_type == LoadType::Data && params.base_url.is_some());
        let (url, body) = match params.load_type {
            LoadType::Data => (
                params.base_url.clone().unwrap_or_else(|| params.url.clone()),
                decode_data_url(&params.url).unwrap_or_default(),
            ),
            LoadType::Default | LoadType::HttpPost => (params.url.clone(), String::new()),
        };
        let title = extract_title(&body).unwrap_or_else(|| url.clone());

        let keep = self.index.map_or(0, |i| i + 1);
        self.pages.truncate(keep);
        self.pages.push(Page {
            item: HistoryItem {
                url: url.clone(),
                original_url: params.url,
                title: title.clone(),
            },
            body,
        });
        self.index = Some(self.pages.len() - 1);
        self.find = None;
        self.publish_metrics();

        self.post(move |client| {
            if reports_start {
                client.on_page_started(&url);
            }
            client.on_progress_changed(100);
            client.on_received_title(&title);
            client.do_update_visited_history(&url, false);
            client.on_page_finished(&url);
        });
    }

    fn evaluate_javascript(&mut self, script: &str, callback: Option<ValueCallback>) {
        let script = script.trim().trim_end_matches(';').trim();

        if let Some(url) = string_argument(script, "window.open") {
            self.open_window(url);
            reply(self, callback, "null".to_string());
            return;
        }
        if let Some(message) = string_argument(script, "alert") {
            let url = self.current_url();
            self.post(move |client| client.handle_js_alert(&url, &message, JsResult::new(|_| {})));
            reply(self, callback, "null".to_string());
            return;
        }
        if let Some(message) = string_argument(script, "confirm") {
            let url = self.current_url();
            self.post(move |client| {
                let result = JsResult::new(move |confirmed| {
                    if let Some(callback) = callback {
                        callback(confirmed.to_string());
                    }
                });
                client.handle_js_confirm(&url, &message, result);
            });
            return;
        }

        let value = match script {
            "document.title" => {
                let title = self.current().map(|page| page.item.title.clone());
                serde_json::Value::from(title.unwrap_or_default())
            }
            "location.href" | "window.location.href" | "document.URL" => {
                serde_json::Value::from(self.current_url())
            }
            literal => parse_literal(literal),
        };
        reply(self, callback, value.to_string());
    }

    fn evaluate_javascript_even_if_not_yet_navigated(&mut self, script: &str) {
        self.evaluate_javascript(script, None);
    }

    fn stop_loading(&mut self) {
        self.metrics.set_progress(100);
    }

    fn reload(&mut self) {
        if let Some(page) = self.current() {
            let url = page.item.url.clone();
            self.post(move |client| {
                client.on_page_started(&url);
                client.do_update_visited_history(&url, true);
                client.on_page_finished(&url);
            });
        }
    }

    fn can_go_back(&self) -> bool {
        self.target_index(-1).is_some()
    }

    fn go_back(&mut self) {
        self.go_back_or_forward(-1);
    }

    fn can_go_forward(&self) -> bool {
        self.target_index(1).is_some()
    }

    fn go_forward(&mut self) {
        self.go_back_or_forward(1);
    }

    fn can_go_back_or_forward(&self, steps: i32) -> bool {
        self.target_index(steps).is_some()
    }

    fn go_back_or_forward(&mut self, steps: i32) {
        if let Some(target) = self.target_index(steps) {
            self.navigate_to(target);
        }
    }

    fn url(&self) -> Option<String> {
        self.current().map(|page| page.item.url.clone())
    }

    fn original_url(&self) -> Option<String> {
        self.current().map(|page| page.item.original_url.clone())
    }

    fn title(&self) -> Option<String> {
        self.current().map(|page| page.item.title.clone())
    }

    fn back_forward_list(&self) -> BackForwardList {
        BackForwardList {
            items: self.pages.iter().map(|page| page.item.clone()).collect(),
            current_index: self.index,
        }
    }

    fn clear_history(&mut self) {
        if let Some(index) = self.index {
            let current = self.pages.swap_remove(index);
            self.pages = vec![current];
            self.index = Some(0);
        }
    }

    fn clear_cache(&mut self, include_disk_files: bool) {
        tracing::trace!(include_disk_files, "nothing cached");
    }

    fn pause_timers(&mut self) {
        self.timers_paused = true;
    }

    fn resume_timers(&mut self) {
        self.timers_paused = false;
    }

    fn on_pause(&mut self) {
        self.paused = true;
    }

    fn on_resume(&mut self) {
        self.paused = false;
    }

    fn set_network_available(&mut self, available: bool) {
        self.network_available = available;
    }

    fn find_all_async(&mut self, text: &str) {
        if text.is_empty() {
            self.find = None;
        } else {
            let needle = text.to_lowercase();
            let matches = self
                .current()
                .map_or(0, |page| page.body.to_lowercase().matches(&needle).count() as u32);
            self.find = Some(FindSession { matches, active: 0 });
        }
        self.report_find_result();
    }

    fn find_next(&mut self, forward: bool) {
        let Some(find) = self.find.as_mut().filter(|find| find.matches > 0) else {
            return;
        };
        find.active = if forward {
            (find.active + 1) % find.matches
        } else {
            (find.active + find.matches - 1) % find.matches
        };
        self.report_find_result();
    }

    fn clear_matches(&mut self) {
        self.find = None;
    }

    fn set_http_auth_username_password(
        &mut self,
        host: &str,
        realm: &str,
        username: &str,
        password: &str,
    ) {
        self.auth.insert(
            (host.to_string(), realm.to_string()),
            (username.to_string(), password.to_string()),
        );
    }

    fn http_auth_username_password(&self, host: &str, realm: &str) -> Option<(String, String)> {
        self.auth
            .get(&(host.to_string(), realm.to_string()))
            .cloned()
    }

    fn save_state(&self) -> Option<SavedState> {
        if self.pages.is_empty() {
            return None;
        }
        Some(SavedState {
            history: self.back_forward_list(),
        })
    }

    fn restore_state(&mut self, state: &SavedState) -> bool {
        let history = &state.history;
        let valid = history.current_index.is_some_and(|i| i < history.len());
        if !valid || self.destroyed {
            return false;
        }
        self.pages = history
            .items
            .iter()
            .map(|item| Page {
                item: item.clone(),
                body: String::new(),
            })
            .collect();
        self.index = history.current_index;
        self.publish_metrics();
        true
    }

    fn on_attached_to_window(&mut self) {
        self.attached = true;
    }

    fn on_detached_from_window(&mut self) {
        self.attached = false;
    }

    fn on_size_changed(&mut self, width: u32, _height: u32) {
        self.width = width;
        self.publish_metrics();
    }

    fn take_pending_popup(&mut self) -> Option<PendingPopup> {
        self.pending_popup.take()
    }

    fn adopt_popup(&mut self, popup: PendingPopup) {
        tracing::debug!(target_url = %popup.target_url, "hosting popup");
        self.load_url(LoadUrlParams::new(popup.target_url));
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.pages.clear();
        self.index = None;
        self.pending_popup = None;
        tracing::debug!(
            paused = self.paused,
            timers_paused = self.timers_paused,
            network_available = self.network_available,
            attached = self.attached,
            "headless contents destroyed"
        );
    }
}

fn reply(contents: &HeadlessContents, callback: Option<ValueCallback>, value: String) {
    if let Some(callback) = callback {
        contents.post(move |_| callback(value));
    }
}

/// The single string argument of `function('...')`.
fn string_argument(script: &str, function: &str) -> Option<String> {
    let argument = script
        .strip_prefix(function)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?
        .trim();
    unquote(argument)
}

fn unquote(literal: &str) -> Option<String> {
    ['\'', '"'].into_iter().find_map(|quote| {
        literal
            .strip_prefix(quote)?
            .strip_suffix(quote)
            .map(str::to_string)
    })
}

fn parse_literal(literal: &str) -> serde_json::Value {
    if let Some(text) = unquote(literal) {
        return serde_json::Value::from(text);
    }
    serde_json::from_str(literal).unwrap_or(serde_json::Value::Null)
}

fn decode_data_url(url: &str) -> Option<String> {
    let (meta, payload) = url.strip_prefix("data:")?.split_once(',')?;
    if meta.split(';').any(|part| part == "base64") {
        let bytes = BASE64.decode(payload).ok()?;
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    Some(payload.to_string())
}

fn extract_title(body: &str) -> Option<String> {
    let lower = body.to_lowercase();
    let start = lower.find("<title>")? + "<title>".len();
    let end = start + lower[start..].find("</title>")?;
    Some(body.get(start..end)?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_plain_and_base64_payloads() {
        assert_eq!(
            decode_data_url("data:text/html,<p>hi</p>").as_deref(),
            Some("<p>hi</p>")
        );
        let encoded = BASE64.encode("<p>hé</p>");
        assert_eq!(
            decode_data_url(&format!("data:text/html;charset=utf-8;base64,{encoded}")).as_deref(),
            Some("<p>hé</p>")
        );
        assert_eq!(decode_data_url("https://a.test/"), None);
    }

    #[test]
    fn title_comes_from_the_title_element() {
        assert_eq!(
            extract_title("<html><TITLE> Hello </TITLE></html>").as_deref(),
            Some("Hello")
        );
        assert_eq!(extract_title("<p>none</p>"), None);
    }

    #[test]
    fn script_arguments_and_literals() {
        assert_eq!(
            string_argument("window.open('https://a.test/')", "window.open").as_deref(),
            Some("https://a.test/")
        );
        assert_eq!(string_argument("alert(\"x\")", "alert").as_deref(), Some("x"));
        assert_eq!(string_argument("alert(x)", "alert"), None);
        assert_eq!(parse_literal("42").to_string(), "42");
        assert_eq!(parse_literal("'a'").to_string(), "\"a\"");
        assert_eq!(parse_literal("navigator.vendor"), serde_json::Value::Null);
    }

    #[test]
    fn functors_are_tracked_until_destroyed() {
        let engine = HeadlessEngine::new();
        let a = engine.create_draw_functor();
        let b = engine.create_draw_functor();
        assert_ne!(a, b);
        assert_eq!(engine.live_functors(), 2);
        engine.destroy_draw_functor(a);
        assert_eq!(engine.live_functors(), 1);
    }
}
