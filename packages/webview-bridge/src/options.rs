use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Platform API levels that change bridge behavior.
pub mod api_level {
    pub const JELLY_BEAN: u32 = 16;
    pub const JELLY_BEAN_MR2: u32 = 18;
    pub const KITKAT: u32 = 19;
    pub const LATEST: u32 = 21;
}

/// Options for constructing a [`Bridge`](crate::Bridge).
///
/// Every field is optional; unset fields fall back to the defaults documented
/// on each accessor. Options deserialize from camelCase JSON so a host can
/// hand over the same object it would pass to the JavaScript bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeOptions {
    /// How long a cross-thread blocking call waits before reporting a
    /// probable deadlock. Default: 4000
    pub blocking_timeout_ms: Option<u64>,
    /// Application target API level. Drives compatibility quirks.
    /// Default: latest
    pub target_api_level: Option<u32>,
    /// Thread name used when the bridge spawns its own engine thread.
    /// Default: "webview-engine"
    pub engine_thread_name: Option<String>,
    /// Log filter used when no `RUST_LOG` is set. Default: "info"
    pub log_filter: Option<String>,
}

pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(4);

impl BridgeOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn blocking_timeout(&self) -> Duration {
        self.blocking_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BLOCKING_TIMEOUT)
    }

    pub fn target_api_level(&self) -> u32 {
        self.target_api_level.unwrap_or(api_level::LATEST)
    }

    pub fn engine_thread_name(&self) -> &str {
        self.engine_thread_name.as_deref().unwrap_or("webview-engine")
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or("info")
    }

    /// Apps targeting JB MR2 or later must use a single thread, so init
    /// binds and checks the calling thread.
    pub fn enforces_thread_at_init(&self) -> bool {
        self.target_api_level() >= api_level::JELLY_BEAN_MR2
    }

    /// Before KitKat, `javascript:` URLs are evaluated directly and their
    /// result does not replace the page.
    pub fn evaluates_javascript_urls(&self) -> bool {
        self.target_api_level() < api_level::KITKAT
    }

    pub fn file_access_from_file_urls_by_default(&self) -> bool {
        self.target_api_level() < api_level::JELLY_BEAN
    }

    pub fn legacy_quirks(&self) -> bool {
        self.target_api_level() < api_level::KITKAT
    }

    /// Private browsing is an error from KitKat on; older apps get a warning.
    pub fn rejects_private_browsing(&self) -> bool {
        self.target_api_level() >= api_level::KITKAT
    }
}
