use std::time::Duration;

use thiserror::Error;

/// Validation failures of the new-window handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PopupError {
    #[error(
        "Parent WebView cannot host its own popup window. \
         Disable multiple-window support instead."
    )]
    SelfHosting,
    #[error("New WebView for popup window must not have been previously navigated.")]
    AlreadyNavigated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Thread violation in {operation}: calling engine methods on a thread other than the engine thread")]
    ThreadViolation { operation: &'static str },
    #[error(
        "Probable deadlock detected in {operation}: no result after {timeout:?}. \
         A WebView API was likely called on the wrong thread while the engine thread is blocked."
    )]
    ProbableDeadlock {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("Engine must be started before {operation} can block on it")]
    NotStarted { operation: &'static str },
    #[error("Engine startup failed: {0}")]
    StartupFailed(String),
    #[error("Engine contents must exist when the call is not posted")]
    ContentsNotCreated,
    #[error("{operation} re-entered the engine contents from one of its own callbacks")]
    ReentrantCall { operation: &'static str },
    #[error("Engine thread is gone; the task can never run")]
    EngineGone,
    #[error(transparent)]
    Popup(#[from] PopupError),
    #[error("Draw functor error: {0}")]
    Functor(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// True for the errors a caller may recover from by not re-blocking.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::ProbableDeadlock { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Config(e.to_string())
    }
}

#[cfg(feature = "node")]
impl From<BridgeError> for napi::Error {
    fn from(e: BridgeError) -> Self {
        napi::Error::from_reason(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
