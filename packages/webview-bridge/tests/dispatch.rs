mod common;

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use pretty_assertions::assert_eq;
use webview_bridge::{BridgeError, BridgeOptions, ThreadPreference};

use common::{local_bridge, threaded_bridge, view_on_engine_thread, Log};

#[test]
fn engine_thread_calls_run_inline() {
    let (mut looper, bridge, _engine) = local_bridge(BridgeOptions::default());
    let view = bridge.create_web_view();
    view.init(false).unwrap();

    view.load_url("https://a.test/").unwrap();
    // No pump needed: the load ran inline and the query answers inline.
    assert_eq!(view.url().unwrap().as_deref(), Some("https://a.test/"));
    assert!(!view.can_go_back().unwrap());
    looper.pump();
}

#[test]
fn other_threads_block_on_the_engine_thread() {
    let (bridge, _thread, _engine) = threaded_bridge(BridgeOptions::default());
    let view = view_on_engine_thread(&bridge);

    view.load_url("https://a.test/").unwrap();
    view.load_url("https://b.test/").unwrap();
    assert_eq!(view.url().unwrap().as_deref(), Some("https://b.test/"));
    assert!(view.can_go_back().unwrap());

    let answering_thread = bridge
        .run_on_engine_thread("thread_name", || {
            thread::current().name().map(str::to_string)
        })
        .unwrap();
    assert_eq!(answering_thread.as_deref(), Some("webview-engine"));
}

#[test]
fn engine_only_calls_fail_elsewhere() {
    let (bridge, _thread, _engine) = threaded_bridge(BridgeOptions::default());
    let view = view_on_engine_thread(&bridge);

    assert_eq!(
        view.evaluate_javascript("1 + 1", None),
        Err(BridgeError::ThreadViolation {
            operation: "evaluate_javascript"
        })
    );
    assert_eq!(
        view.on_attached_to_window(),
        Err(BridgeError::ThreadViolation {
            operation: "on_attached_to_window"
        })
    );

    // Modern targets must initialize on the engine thread too.
    let stray = bridge.create_web_view();
    assert!(matches!(
        stray.init(false),
        Err(BridgeError::ThreadViolation { operation: "init" })
    ));
}

#[test]
fn blocked_engine_thread_reports_a_probable_deadlock() {
    let options = BridgeOptions {
        blocking_timeout_ms: Some(100),
        ..BridgeOptions::default()
    };
    let (bridge, _thread, _engine) = threaded_bridge(options);
    let view = view_on_engine_thread(&bridge);
    view.load_url("https://a.test/").unwrap();

    let (release_tx, release_rx) = bounded::<()>(1);
    let looper = bridge.gate().engine_looper().unwrap();
    looper
        .post(Box::new(move || {
            let _ = release_rx.recv();
        }))
        .unwrap();

    let started = Instant::now();
    let err = view.url().unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The abandoned query still runs once the engine thread is free.
    release_tx.send(()).unwrap();
    assert_eq!(view.url().unwrap().as_deref(), Some("https://a.test/"));
}

#[test]
fn calls_after_the_engine_thread_quits_fail() {
    let (bridge, thread, _engine) = threaded_bridge(BridgeOptions::default());
    let view = view_on_engine_thread(&bridge);
    thread.shutdown().unwrap();

    assert_eq!(view.url(), Err(BridgeError::EngineGone));
    assert_eq!(view.reload(), Err(BridgeError::EngineGone));
}

#[test]
fn client_callbacks_may_call_back_into_the_view() {
    let (mut looper, bridge, _engine) = local_bridge(BridgeOptions::default());
    let view = bridge.create_web_view();
    view.init(false).unwrap();

    let log = Log::default();
    view.set_web_view_client(Some(std::sync::Arc::new(UrlEcho(log.clone()))));
    view.load_url("https://a.test/").unwrap();
    assert_eq!(looper.pump(), 1);
    assert_eq!(log.entries(), vec!["finished https://a.test/ at Some(\"https://a.test/\")"]);
}

struct UrlEcho(Log);

impl webview_bridge::WebViewClient for UrlEcho {
    fn on_page_finished(&self, view: &webview_bridge::WebView, url: &str) {
        let current = view.url();
        self.0.push(format!("finished {url} at {:?}", current.ok().flatten()));
    }
}

#[test]
fn first_thread_preference_wins() {
    let (bridge, _thread, _engine) = threaded_bridge(BridgeOptions::default());
    let _local = webview_bridge::Looper::prepare().unwrap();

    bridge.start_engines(ThreadPreference::Current).unwrap();
    assert!(bridge.gate().is_on_engine_thread());
    bridge.start_engines(ThreadPreference::Main).unwrap();
    assert!(bridge.gate().is_on_engine_thread());
}
