//! Thread-affinity bridge between a public web view API and a single-threaded
//! browser engine.
//!
//! Calls may arrive on any thread and before the engine has started. The
//! bridge starts the engine exactly once, queues work until it runs, runs
//! calls inline on the engine thread, posts them from other threads, and
//! bounds every cross-thread blocking call with a deadlock timeout.

#[cfg(feature = "node")]
#[macro_use]
extern crate napi_derive;

pub mod bootstrap;
pub mod bridge;
pub mod client;
pub mod contents;
pub mod dispatcher;
pub mod draw_functor;
pub mod error;
pub mod headless;
pub mod logging;
pub mod looper;
pub mod options;
pub mod popup;
pub mod replies;
pub mod run_queue;
pub mod services;
pub mod settings;
pub mod webview;

#[cfg(feature = "node")]
mod bindings;
#[cfg(feature = "node")]
mod events;

// Re-export the binding functions so napi picks them up
#[cfg(feature = "node")]
pub use bindings::*;

pub use bootstrap::{EngineBootstrap, EnginePhase, StartListener, ThreadPreference};
pub use bridge::{Bridge, EngineThread};
pub use client::{
    ContentsClientAdapter, DownloadListener, FindListener, NullWebViewClient, WebChromeClient,
    WebViewClient,
};
pub use contents::{BackForwardList, Contents, Engine, HistoryItem, LoadUrlParams, SavedState};
pub use dispatcher::{BlockingCallTicket, Dispatcher};
pub use error::{BridgeError, PopupError, Result};
pub use headless::HeadlessEngine;
pub use looper::{spawn_looper, Looper, LooperHandle, Task};
pub use options::BridgeOptions;
pub use popup::{NewWindowRequest, PopupState, PopupTracker, WindowTransport};
pub use run_queue::RunQueue;
pub use settings::{LayoutAlgorithm, WebSettings};
pub use webview::{WeakWebView, WebView};
