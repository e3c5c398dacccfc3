mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use webview_bridge::options::api_level;
use webview_bridge::{
    Bridge, BridgeError, BridgeOptions, Dispatcher, EngineBootstrap, EnginePhase, HeadlessEngine,
    RunQueue, ThreadPreference,
};

use common::{legacy, threaded_bridge, Log};

#[test]
fn concurrent_callers_start_the_engine_once() {
    let (bridge, _thread, engine) = threaded_bridge(BridgeOptions::default());
    let barrier = Arc::new(Barrier::new(8));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                bridge.start_engines(ThreadPreference::Main)
            })
        })
        .collect();

    for caller in callers {
        assert_eq!(caller.join().unwrap(), Ok(()));
    }
    assert_eq!(engine.start_count(), 1);
    assert_eq!(bridge.gate().phase(), EnginePhase::Running);
    assert!(!bridge.gate().is_on_engine_thread());
}

#[test]
fn queued_work_runs_in_order_and_only_after_startup() {
    let (main, join) = webview_bridge::spawn_looper("startup-main").unwrap();
    let log = Log::default();
    let startup_log = log.clone();
    let engine = Arc::new(HeadlessEngine::new().with_startup(move || {
        startup_log.push("engine started");
        Ok(())
    }));
    let gate = EngineBootstrap::new(main.clone(), engine, BridgeOptions::default());
    let dispatcher = Dispatcher::new(gate.clone(), RunQueue::new(gate.clone()), Duration::from_secs(4));

    for i in 0..3 {
        let log = log.clone();
        dispatcher
            .post_or_run("record", move || log.push(format!("task {i}")))
            .unwrap();
    }
    assert_eq!(dispatcher.run_queue().len(), 3);
    assert!(log.entries().is_empty());

    // Stands in for a web view registered before startup.
    let listener = Arc::new(QueueDrainer(dispatcher.run_queue().clone()));
    let weak = Arc::downgrade(&listener) as std::sync::Weak<dyn webview_bridge::StartListener>;
    assert!(gate.register_client(weak));
    gate.ensure_started(ThreadPreference::Main).unwrap();

    let answer = dispatcher.call("after", || "done").unwrap();
    assert_eq!(answer, "done");
    assert_eq!(
        log.entries(),
        vec!["engine started", "task 0", "task 1", "task 2"]
    );
    assert!(dispatcher.run_queue().is_empty());

    main.quit();
    join.join().unwrap();
}

struct QueueDrainer(Arc<RunQueue>);

impl webview_bridge::StartListener for QueueDrainer {
    fn on_engine_started(&self) {
        self.0.drain();
    }
}

#[test]
fn startup_failure_reaches_every_waiter() {
    let engine = Arc::new(
        HeadlessEngine::new().with_startup(|| Err(BridgeError::StartupFailed("no gpu".into()))),
    );
    let (bridge, _thread) = Bridge::with_engine_thread(engine.clone(), BridgeOptions::default()).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let bridge = bridge.clone();
            thread::spawn(move || bridge.start_engines(ThreadPreference::Main))
        })
        .collect();
    for waiter in waiters {
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err, BridgeError::StartupFailed("no gpu".to_string()));
        assert_eq!(err.to_string(), "Engine startup failed: no gpu");
    }
    assert_eq!(engine.start_count(), 1);
    assert_eq!(bridge.gate().startup_failure().as_deref(), Some("no gpu"));
}

#[test]
fn calls_after_a_failed_startup_report_the_failure() {
    let engine = Arc::new(
        HeadlessEngine::new().with_startup(|| Err(BridgeError::StartupFailed("no gpu".into()))),
    );
    let (bridge, _thread) =
        Bridge::with_engine_thread(engine.clone(), legacy(api_level::JELLY_BEAN)).unwrap();
    let view = bridge.create_web_view();

    // Nothing has tried to start the engine yet, so this is queued.
    view.init(false).unwrap();

    let failed = Err(BridgeError::StartupFailed("no gpu".to_string()));
    assert_eq!(view.load_url("https://a.test/"), failed);
    assert_eq!(view.stop_loading(), failed);
    assert_eq!(view.reload(), failed);
    assert_eq!(view.clear_history(), failed);
    assert_eq!(view.url(), Err(BridgeError::StartupFailed("no gpu".to_string())));
    assert_eq!(engine.start_count(), 1);
    assert!(!bridge.has_started());
}

#[test]
fn legacy_views_queue_until_a_blocking_call_starts_the_engine() {
    let (bridge, _thread, engine) = threaded_bridge(legacy(api_level::JELLY_BEAN));
    let view = bridge.create_web_view();

    view.init(false).unwrap();
    view.set_http_auth_username_password("a.test", "realm", "user", "secret")
        .unwrap();
    // Starts the engine; the queued calls run before the load is posted.
    view.load_url("https://a.test/").unwrap();

    assert_eq!(engine.start_count(), 1);
    assert_eq!(
        view.http_auth_username_password("a.test", "realm").unwrap(),
        Some(("user".to_string(), "secret".to_string()))
    );
    assert_eq!(view.url().unwrap().as_deref(), Some("https://a.test/"));
}

#[test]
fn fire_and_forget_calls_do_not_start_the_engine() {
    let (bridge, _thread, engine) = threaded_bridge(legacy(api_level::JELLY_BEAN));
    let view = bridge.create_web_view();
    view.init(false).unwrap();
    view.stop_loading().unwrap();
    view.clear_history().unwrap();
    view.on_pause().unwrap();

    assert!(!bridge.has_started());
    assert_eq!(engine.start_count(), 0);
    assert_eq!(view.progress(), 100);
    assert_eq!(view.content_height(), 0);
}

#[test]
fn services() {
    let (bridge, _thread, _engine) = threaded_bridge(BridgeOptions::default());

    let cookies = bridge.cookie_manager();
    cookies.set_cookie("https://a.test/", "session=1; Path=/");
    assert_eq!(cookies.cookie("https://a.test/x").as_deref(), Some("session=1"));
    assert!(!bridge.has_started());

    let storage = bridge.web_storage().unwrap();
    assert!(bridge.has_started());
    storage.record_usage("https://a.test/page", 10);
    assert_eq!(storage.usage_for_origin("https://a.test"), 10);

    let geolocation = bridge.geolocation_permissions().unwrap();
    geolocation.allow("https://maps.test/here");
    assert!(bridge
        .geolocation_permissions()
        .unwrap()
        .is_allowed("https://maps.test"));
}
