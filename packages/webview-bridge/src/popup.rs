//! New-window handshake.
//!
//! When a page opens a window the engine asks the chrome client, handing it
//! a [`NewWindowRequest`]. The application either puts a fresh view in the
//! request's transport or leaves it empty to decline, then calls
//! [`NewWindowRequest::send`] exactly once. Sending consumes the request.
//! A request dropped without a successful send declines the popup.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PopupError, Result};
use crate::webview::WebView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupState {
    Requested,
    AwaitingTransport,
    Completed,
}

/// Carries the view that will host the popup.
#[derive(Default)]
pub struct WindowTransport {
    web_view: Option<WebView>,
}

impl WindowTransport {
    /// `None` declines the popup.
    pub fn set_web_view(&mut self, web_view: Option<WebView>) {
        self.web_view = web_view;
    }

    pub fn web_view(&self) -> Option<&WebView> {
        self.web_view.as_ref()
    }
}

/// Observes the state transitions of one request, including after the
/// request itself has been sent.
#[derive(Clone)]
pub struct PopupTracker {
    transitions: Arc<Mutex<Vec<PopupState>>>,
}

impl PopupTracker {
    fn new() -> Self {
        Self {
            transitions: Arc::new(Mutex::new(vec![PopupState::Requested])),
        }
    }

    pub fn state(&self) -> PopupState {
        self.transitions
            .lock()
            .last()
            .copied()
            .unwrap_or(PopupState::Requested)
    }

    /// Every state the request has been in, in order.
    pub fn transitions(&self) -> Vec<PopupState> {
        self.transitions.lock().clone()
    }

    fn advance(&self, to: PopupState) {
        let mut transitions = self.transitions.lock();
        if transitions.last() != Some(&to) {
            transitions.push(to);
        }
    }
}

pub struct NewWindowRequest {
    parent: WebView,
    transport: WindowTransport,
    tracker: PopupTracker,
    completed: bool,
}

impl NewWindowRequest {
    pub(crate) fn new(parent: WebView) -> Self {
        Self {
            parent,
            transport: WindowTransport::default(),
            tracker: PopupTracker::new(),
            completed: false,
        }
    }

    pub(crate) fn hand_to_application(&mut self) {
        self.tracker.advance(PopupState::AwaitingTransport);
    }

    pub fn parent(&self) -> &WebView {
        &self.parent
    }

    pub fn transport(&mut self) -> &mut WindowTransport {
        &mut self.transport
    }

    pub fn state(&self) -> PopupState {
        self.tracker.state()
    }

    pub fn tracker(&self) -> PopupTracker {
        self.tracker.clone()
    }

    /// Validate the transport and hand the popup to the new view.
    ///
    /// The parent may not host its own popup and the new view must not have
    /// navigated yet. Completion runs on the engine thread. On error the
    /// request is dropped, which declines the popup.
    pub fn send(mut self) -> Result<()> {
        if let Some(child) = &self.transport.web_view {
            if child.ptr_eq(&self.parent) {
                return Err(PopupError::SelfHosting.into());
            }
            if !child.copy_back_forward_list()?.is_empty() {
                return Err(PopupError::AlreadyNavigated.into());
            }
        }

        let child = self.transport.web_view.take();
        self.complete(child)
    }

    fn complete(&mut self, child: Option<WebView>) -> Result<()> {
        self.completed = true;
        self.parent.complete_window_creation(child)?;
        self.tracker.advance(PopupState::Completed);
        Ok(())
    }
}

impl Drop for NewWindowRequest {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::debug!("window request dropped without a transport, declining");
        if let Err(e) = self.complete(None) {
            tracing::warn!(error = %e, "failed to decline dropped window request");
        }
    }
}

impl fmt::Debug for NewWindowRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewWindowRequest")
            .field("state", &self.state())
            .field("has_web_view", &self.transport.web_view.is_some())
            .finish()
    }
}
