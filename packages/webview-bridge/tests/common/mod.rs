#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use webview_bridge::draw_functor::{DrawCanvas, FunctorHandle, ViewRoot};
use webview_bridge::{Bridge, BridgeOptions, EngineThread, HeadlessEngine, Looper, WebView};

/// A bridge whose engine runs on the calling thread.
pub fn local_bridge(options: BridgeOptions) -> (Looper, Bridge, Arc<HeadlessEngine>) {
    let looper = Looper::prepare().unwrap();
    let engine = Arc::new(HeadlessEngine::new());
    let bridge = Bridge::new(engine.clone(), looper.handle(), options);
    (looper, bridge, engine)
}

/// A bridge whose main looper is a dedicated thread.
pub fn threaded_bridge(options: BridgeOptions) -> (Bridge, EngineThread, Arc<HeadlessEngine>) {
    let engine = Arc::new(HeadlessEngine::new());
    let (bridge, thread) = Bridge::with_engine_thread(engine.clone(), options).unwrap();
    (bridge, thread, engine)
}

/// Create and initialize a view on the engine thread.
pub fn view_on_engine_thread(bridge: &Bridge) -> WebView {
    let factory = bridge.clone();
    bridge
        .run_on_engine_thread("create_view", move || {
            let view = factory.create_web_view();
            view.init(false).map(|()| view)
        })
        .unwrap()
        .unwrap()
}

pub fn legacy(api_level: u32) -> BridgeOptions {
    BridgeOptions {
        target_api_level: Some(api_level),
        ..BridgeOptions::default()
    }
}

/// Shared, ordered record of what happened.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub struct FakeCanvas {
    pub hardware: bool,
    pub status: i32,
    pub drawn: Vec<FunctorHandle>,
}

impl DrawCanvas for FakeCanvas {
    fn is_hardware_accelerated(&self) -> bool {
        self.hardware
    }

    fn call_draw_functor(&mut self, functor: FunctorHandle) -> i32 {
        self.drawn.push(functor);
        self.status
    }
}

pub struct RecordingViewRoot(pub Log);

impl ViewRoot for RecordingViewRoot {
    fn detach_functor(&mut self, functor: FunctorHandle) {
        self.0.push(format!("detach {}", functor.0));
    }
}
