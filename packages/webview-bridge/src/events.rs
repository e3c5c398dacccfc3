use napi::threadsafe_function::{ErrorStrategy, ThreadsafeFunction, ThreadsafeFunctionCallMode};
use parking_lot::Mutex;

use crate::client::{FindListener, WebChromeClient, WebViewClient};
use crate::webview::WebView;

/// Callback for page load events: (event_type, url).
/// event_type is "started" or "finished"
pub type PageLoadCallback = ThreadsafeFunction<(String, String), ErrorStrategy::Fatal>;

/// Callback for document title change events.
pub type TitleChangedCallback = ThreadsafeFunction<String, ErrorStrategy::Fatal>;

/// Callback for load progress (0..=100).
pub type ProgressCallback = ThreadsafeFunction<u32, ErrorStrategy::Fatal>;

/// Callback for find-in-page results: (active_match, match_count, done).
pub type FindResultCallback = ThreadsafeFunction<(u32, u32, bool), ErrorStrategy::Fatal>;

/// Callback for load errors: (error_code, description, failing_url).
pub type LoadErrorCallback = ThreadsafeFunction<(i32, String, String), ErrorStrategy::Fatal>;

/// Callback receiving the JSON result of a script evaluation.
pub type ScriptResultCallback = ThreadsafeFunction<String, ErrorStrategy::Fatal>;

/// Stored JavaScript handlers for one web view. Registered on the view as
/// its web view client, chrome client and find listener.
#[derive(Default)]
pub struct WebViewEventHandlers {
    pub on_page_load: Mutex<Option<PageLoadCallback>>,
    pub on_title_changed: Mutex<Option<TitleChangedCallback>>,
    pub on_progress: Mutex<Option<ProgressCallback>>,
    pub on_find_result: Mutex<Option<FindResultCallback>>,
    pub on_load_error: Mutex<Option<LoadErrorCallback>>,
}

impl WebViewEventHandlers {
    fn page_load(&self, event: &str, url: &str) {
        if let Some(cb) = &*self.on_page_load.lock() {
            cb.call(
                (event.to_string(), url.to_string()),
                ThreadsafeFunctionCallMode::NonBlocking,
            );
        }
    }
}

impl WebViewClient for WebViewEventHandlers {
    fn on_page_started(&self, _view: &WebView, url: &str) {
        self.page_load("started", url);
    }

    fn on_page_finished(&self, _view: &WebView, url: &str) {
        self.page_load("finished", url);
    }

    fn on_received_error(&self, _view: &WebView, error_code: i32, description: &str, failing_url: &str) {
        if let Some(cb) = &*self.on_load_error.lock() {
            cb.call(
                (error_code, description.to_string(), failing_url.to_string()),
                ThreadsafeFunctionCallMode::NonBlocking,
            );
        }
    }
}

impl WebChromeClient for WebViewEventHandlers {
    fn on_progress_changed(&self, _view: &WebView, progress: u32) {
        if let Some(cb) = &*self.on_progress.lock() {
            cb.call(progress, ThreadsafeFunctionCallMode::NonBlocking);
        }
    }

    fn on_received_title(&self, _view: &WebView, title: &str) {
        if let Some(cb) = &*self.on_title_changed.lock() {
            cb.call(title.to_string(), ThreadsafeFunctionCallMode::NonBlocking);
        }
    }
}

impl FindListener for WebViewEventHandlers {
    fn on_find_result_received(&self, active_match_ordinal: u32, number_of_matches: u32, is_done_counting: bool) {
        if let Some(cb) = &*self.on_find_result.lock() {
            cb.call(
                (active_match_ordinal, number_of_matches, is_done_counting),
                ThreadsafeFunctionCallMode::NonBlocking,
            );
        }
    }
}
