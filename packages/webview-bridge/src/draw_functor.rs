//! Hardware draw functors.
//!
//! How a functor reaches the compositor differs between platform versions:
//! older platforms only offer a draw call on the hardware canvas that reports
//! a boolean, newer ones return a status code and let the view root attach
//! and detach functors. The variant is picked once at startup by
//! [`negotiate`] from the engine's [`PlatformFeatures`].

use std::fmt;
use std::sync::Arc;

use crate::contents::Engine;
use crate::error::{BridgeError, Result};
use crate::options::api_level;

/// Engine-side identifier of a native draw functor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctorHandle(pub u64);

/// What the host platform exposes for functor drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformFeatures {
    pub api_level: u32,
    /// The canvas can invoke a draw functor directly.
    pub has_hardware_canvas: bool,
    /// The view root can attach and detach functors.
    pub has_view_root_functors: bool,
}

impl Default for PlatformFeatures {
    fn default() -> Self {
        Self {
            api_level: api_level::LATEST,
            has_hardware_canvas: true,
            has_view_root_functors: true,
        }
    }
}

/// The canvas handed to a view's draw pass.
pub trait DrawCanvas {
    fn is_hardware_accelerated(&self) -> bool;
    /// Invoke `functor`, returning the platform's raw result.
    fn call_draw_functor(&mut self, functor: FunctorHandle) -> i32;
}

pub trait ViewRoot {
    fn detach_functor(&mut self, functor: FunctorHandle);
}

/// One platform generation's way of driving a draw functor.
pub trait DrawFunctorApi: Send + Sync {
    fn name(&self) -> &'static str;

    /// Draw `functor` on `canvas`; `true` when the draw was accepted.
    fn draw(&self, canvas: &mut dyn DrawCanvas, functor: FunctorHandle) -> bool;

    fn supports_detach(&self) -> bool {
        false
    }

    fn detach(&self, _view_root: &mut dyn ViewRoot, _functor: FunctorHandle) {}
}

/// Older platforms: the canvas call returns a boolean, no detach.
pub struct CanvasOnlyApi;

impl DrawFunctorApi for CanvasOnlyApi {
    fn name(&self) -> &'static str {
        "canvas-only"
    }

    fn draw(&self, canvas: &mut dyn DrawCanvas, functor: FunctorHandle) -> bool {
        canvas.call_draw_functor(functor) != 0
    }
}

/// Newer platforms: the canvas call returns a status code (0 is done) and
/// functors are detached through the view root.
pub struct AttachableApi;

impl DrawFunctorApi for AttachableApi {
    fn name(&self) -> &'static str {
        "attachable"
    }

    fn draw(&self, canvas: &mut dyn DrawCanvas, functor: FunctorHandle) -> bool {
        let status = canvas.call_draw_functor(functor);
        if status != 0 {
            tracing::debug!(status, ?functor, "draw functor reported non-zero status");
        }
        status == 0
    }

    fn supports_detach(&self) -> bool {
        true
    }

    fn detach(&self, view_root: &mut dyn ViewRoot, functor: FunctorHandle) {
        view_root.detach_functor(functor);
    }
}

/// No hardware canvas: every draw falls back to software.
pub struct UnsupportedApi;

impl DrawFunctorApi for UnsupportedApi {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn draw(&self, _canvas: &mut dyn DrawCanvas, _functor: FunctorHandle) -> bool {
        false
    }
}

/// Pick the functor API for the running platform.
pub fn negotiate(features: &PlatformFeatures) -> Arc<dyn DrawFunctorApi> {
    let api: Arc<dyn DrawFunctorApi> = if !features.has_hardware_canvas {
        tracing::error!(
            api_level = features.api_level,
            "hardware canvas unavailable, draw functors disabled"
        );
        Arc::new(UnsupportedApi)
    } else if features.has_view_root_functors && features.api_level >= api_level::JELLY_BEAN {
        Arc::new(AttachableApi)
    } else {
        Arc::new(CanvasOnlyApi)
    };
    tracing::debug!(api = api.name(), "negotiated draw functor api");
    api
}

/// A native draw functor bound to one contents.
///
/// Can be drawn and detached any number of times. Destroying releases the
/// native functor; dropping destroys it if that has not happened yet.
pub struct DrawFunctor {
    handle: Option<FunctorHandle>,
    api: Arc<dyn DrawFunctorApi>,
    engine: Arc<dyn Engine>,
}

impl DrawFunctor {
    pub fn new(engine: Arc<dyn Engine>, api: Arc<dyn DrawFunctorApi>) -> Self {
        let handle = engine.create_draw_functor();
        Self {
            handle: Some(handle),
            api,
            engine,
        }
    }

    pub fn handle(&self) -> Option<FunctorHandle> {
        self.handle
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    /// Ask `canvas` to run the functor. `Ok(false)` means the caller should
    /// fall back to a software draw.
    pub fn request_draw(&mut self, canvas: &mut dyn DrawCanvas) -> Result<bool> {
        let functor = self.live_handle("request_draw")?;
        if !canvas.is_hardware_accelerated() {
            return Ok(false);
        }
        Ok(self.api.draw(canvas, functor))
    }

    pub fn detach(&mut self, view_root: &mut dyn ViewRoot) -> Result<()> {
        let functor = self.live_handle("detach")?;
        if self.api.supports_detach() {
            self.api.detach(view_root, functor);
        }
        Ok(())
    }

    pub fn destroy(&mut self) {
        if let Some(functor) = self.handle.take() {
            self.engine.destroy_draw_functor(functor);
        }
    }

    fn live_handle(&self, operation: &str) -> Result<FunctorHandle> {
        self.handle.ok_or_else(|| {
            BridgeError::Functor(format!("{operation} on an already destroyed draw functor"))
        })
    }
}

impl Drop for DrawFunctor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for DrawFunctor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawFunctor")
            .field("handle", &self.handle)
            .field("api", &self.api.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessEngine;
    use pretty_assertions::assert_eq;

    struct FakeCanvas {
        hardware: bool,
        result: i32,
        calls: Vec<FunctorHandle>,
    }

    impl DrawCanvas for FakeCanvas {
        fn is_hardware_accelerated(&self) -> bool {
            self.hardware
        }

        fn call_draw_functor(&mut self, functor: FunctorHandle) -> i32 {
            self.calls.push(functor);
            self.result
        }
    }

    #[derive(Default)]
    struct FakeViewRoot {
        detached: Vec<FunctorHandle>,
    }

    impl ViewRoot for FakeViewRoot {
        fn detach_functor(&mut self, functor: FunctorHandle) {
            self.detached.push(functor);
        }
    }

    fn canvas(result: i32) -> FakeCanvas {
        FakeCanvas {
            hardware: true,
            result,
            calls: Vec::new(),
        }
    }

    #[test]
    fn negotiation_follows_platform_features() {
        let modern = PlatformFeatures::default();
        assert_eq!(negotiate(&modern).name(), "attachable");

        let jelly_bean = PlatformFeatures {
            api_level: api_level::JELLY_BEAN,
            ..modern
        };
        assert_eq!(negotiate(&jelly_bean).name(), "attachable");

        let old = PlatformFeatures {
            api_level: api_level::JELLY_BEAN - 1,
            ..modern
        };
        assert_eq!(negotiate(&old).name(), "canvas-only");

        let no_view_root = PlatformFeatures {
            has_view_root_functors: false,
            ..modern
        };
        assert_eq!(negotiate(&no_view_root).name(), "canvas-only");

        let software = PlatformFeatures {
            has_hardware_canvas: false,
            ..modern
        };
        assert_eq!(negotiate(&software).name(), "unsupported");
    }

    #[test]
    fn result_codes_are_interpreted_per_api() {
        let f = FunctorHandle(7);
        assert!(CanvasOnlyApi.draw(&mut canvas(1), f));
        assert!(!CanvasOnlyApi.draw(&mut canvas(0), f));
        assert!(AttachableApi.draw(&mut canvas(0), f));
        assert!(!AttachableApi.draw(&mut canvas(2), f));
    }

    #[test]
    fn jelly_bean_mr2_reads_zero_status_as_drawn() {
        let features = PlatformFeatures {
            api_level: api_level::JELLY_BEAN_MR2,
            has_hardware_canvas: true,
            has_view_root_functors: true,
        };
        let engine = Arc::new(HeadlessEngine::new());
        let mut functor = DrawFunctor::new(engine, negotiate(&features));
        let mut hw = canvas(0);
        assert_eq!(functor.request_draw(&mut hw), Ok(true));
        assert_eq!(hw.calls, vec![functor.handle().unwrap()]);
    }

    #[test]
    fn software_canvas_skips_the_functor() {
        let engine = Arc::new(HeadlessEngine::new());
        let mut functor = DrawFunctor::new(engine, Arc::new(AttachableApi));
        let mut sw = FakeCanvas {
            hardware: false,
            result: 0,
            calls: Vec::new(),
        };
        assert_eq!(functor.request_draw(&mut sw), Ok(false));
        assert!(sw.calls.is_empty());
    }

    #[test]
    fn detach_only_reaches_the_view_root_when_supported() {
        let engine = Arc::new(HeadlessEngine::new());
        let mut root = FakeViewRoot::default();

        let mut old = DrawFunctor::new(engine.clone(), Arc::new(CanvasOnlyApi));
        old.detach(&mut root).unwrap();
        assert!(root.detached.is_empty());

        let mut new = DrawFunctor::new(engine, Arc::new(AttachableApi));
        new.detach(&mut root).unwrap();
        assert_eq!(root.detached, vec![new.handle().unwrap()]);
    }

    #[test]
    fn destroy_is_idempotent_and_blocks_further_draws() {
        let engine = Arc::new(HeadlessEngine::new());
        let mut functor = DrawFunctor::new(engine.clone(), Arc::new(AttachableApi));
        assert_eq!(engine.live_functors(), 1);
        functor.destroy();
        functor.destroy();
        assert_eq!(engine.live_functors(), 0);
        assert!(matches!(
            functor.request_draw(&mut canvas(0)),
            Err(BridgeError::Functor(_))
        ));
    }

    #[test]
    fn dropping_releases_the_native_functor() {
        let engine = Arc::new(HeadlessEngine::new());
        drop(DrawFunctor::new(engine.clone(), Arc::new(CanvasOnlyApi)));
        assert_eq!(engine.live_functors(), 0);
    }
}
