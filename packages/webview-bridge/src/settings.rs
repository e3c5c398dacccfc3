//! Per-view settings.
//!
//! [`EngineSettings`] is the engine's schema; [`WebSettings`] is the public
//! one layered over it. Most fields forward one to one. A few public
//! settings no longer exist in the engine and are kept as documented no-ops.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::options::BridgeOptions;

/// Layout algorithm as the engine enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineLayoutAlgorithm {
    Normal,
    SingleColumn,
    NarrowColumns,
    TextAutosizing,
}

/// Layout algorithm as the public API enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutAlgorithm {
    Normal,
    SingleColumn,
    NarrowColumns,
    TextAutosizing,
}

impl From<LayoutAlgorithm> for EngineLayoutAlgorithm {
    fn from(value: LayoutAlgorithm) -> Self {
        match value {
            LayoutAlgorithm::Normal => EngineLayoutAlgorithm::Normal,
            LayoutAlgorithm::SingleColumn => EngineLayoutAlgorithm::SingleColumn,
            LayoutAlgorithm::NarrowColumns => EngineLayoutAlgorithm::NarrowColumns,
            LayoutAlgorithm::TextAutosizing => EngineLayoutAlgorithm::TextAutosizing,
        }
    }
}

impl From<EngineLayoutAlgorithm> for LayoutAlgorithm {
    // Text autosizing reads back as narrow columns.
    fn from(value: EngineLayoutAlgorithm) -> Self {
        match value {
            EngineLayoutAlgorithm::Normal => LayoutAlgorithm::Normal,
            EngineLayoutAlgorithm::SingleColumn => LayoutAlgorithm::SingleColumn,
            EngineLayoutAlgorithm::NarrowColumns | EngineLayoutAlgorithm::TextAutosizing => {
                LayoutAlgorithm::NarrowColumns
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoomDensity {
    Far,
    Medium,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderPriority {
    Normal,
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheMode {
    Default,
    ElseNetwork,
    NoCache,
    CacheOnly,
}

/// The engine's settings for one contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub support_zoom: bool,
    pub built_in_zoom_controls: bool,
    pub display_zoom_controls: bool,
    pub allow_file_access: bool,
    pub allow_content_access: bool,
    pub load_with_overview_mode: bool,
    pub save_form_data: bool,
    pub text_zoom: u32,
    pub use_wide_viewport: bool,
    pub support_multiple_windows: bool,
    pub layout_algorithm: EngineLayoutAlgorithm,
    pub standard_font_family: String,
    pub fixed_font_family: String,
    pub sans_serif_font_family: String,
    pub serif_font_family: String,
    pub cursive_font_family: String,
    pub fantasy_font_family: String,
    pub minimum_font_size: u32,
    pub minimum_logical_font_size: u32,
    pub default_font_size: u32,
    pub default_fixed_font_size: u32,
    pub loads_images_automatically: bool,
    pub images_enabled: bool,
    pub block_network_loads: bool,
    pub javascript_enabled: bool,
    pub allow_universal_access_from_file_urls: bool,
    pub allow_file_access_from_file_urls: bool,
    pub plugins_enabled: bool,
    pub app_cache_enabled: bool,
    pub app_cache_path: String,
    pub database_enabled: bool,
    pub dom_storage_enabled: bool,
    pub geolocation_enabled: bool,
    pub javascript_can_open_windows_automatically: bool,
    pub default_text_encoding_name: String,
    /// `None` means the engine default user agent.
    pub user_agent_string: Option<String>,
    pub should_focus_first_node: bool,
    pub cache_mode: CacheMode,
    pub media_playback_requires_user_gesture: bool,
    pub supports_legacy_quirks: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            support_zoom: true,
            built_in_zoom_controls: false,
            display_zoom_controls: true,
            allow_file_access: true,
            allow_content_access: true,
            load_with_overview_mode: false,
            save_form_data: true,
            text_zoom: 100,
            use_wide_viewport: false,
            support_multiple_windows: false,
            layout_algorithm: EngineLayoutAlgorithm::NarrowColumns,
            standard_font_family: "sans-serif".to_string(),
            fixed_font_family: "monospace".to_string(),
            sans_serif_font_family: "sans-serif".to_string(),
            serif_font_family: "serif".to_string(),
            cursive_font_family: "cursive".to_string(),
            fantasy_font_family: "fantasy".to_string(),
            minimum_font_size: 8,
            minimum_logical_font_size: 8,
            default_font_size: 16,
            default_fixed_font_size: 13,
            loads_images_automatically: true,
            images_enabled: true,
            block_network_loads: false,
            javascript_enabled: false,
            allow_universal_access_from_file_urls: false,
            allow_file_access_from_file_urls: false,
            plugins_enabled: false,
            app_cache_enabled: false,
            app_cache_path: String::new(),
            database_enabled: false,
            dom_storage_enabled: false,
            geolocation_enabled: true,
            javascript_can_open_windows_automatically: false,
            default_text_encoding_name: "Latin-1".to_string(),
            user_agent_string: None,
            should_focus_first_node: true,
            cache_mode: CacheMode::Default,
            media_playback_requires_user_gesture: true,
            supports_legacy_quirks: false,
        }
    }
}

impl EngineSettings {
    /// Defaults adjusted for the application's target level.
    pub fn for_options(options: &BridgeOptions) -> Self {
        let mut settings = Self::default();
        if options.file_access_from_file_urls_by_default() {
            settings.allow_universal_access_from_file_urls = true;
            settings.allow_file_access_from_file_urls = true;
        }
        settings.supports_legacy_quirks = options.legacy_quirks();
        settings
    }
}

macro_rules! forward_settings {
    ($($field:ident: $ty:ty => $getter:ident / $setter:ident;)*) => {
        impl WebSettings {
            $(
                pub fn $getter(&self) -> $ty {
                    self.inner.lock().$field.clone()
                }

                pub fn $setter(&self, value: $ty) {
                    self.inner.lock().$field = value;
                }
            )*
        }
    };
}

/// Public settings for one web view.
///
/// Cheap to clone; every clone edits the same engine settings.
#[derive(Clone)]
pub struct WebSettings {
    inner: Arc<Mutex<EngineSettings>>,
    default_user_agent: Arc<str>,
}

forward_settings! {
    support_zoom: bool => support_zoom / set_support_zoom;
    built_in_zoom_controls: bool => built_in_zoom_controls / set_built_in_zoom_controls;
    display_zoom_controls: bool => display_zoom_controls / set_display_zoom_controls;
    allow_file_access: bool => allow_file_access / set_allow_file_access;
    allow_content_access: bool => allow_content_access / set_allow_content_access;
    load_with_overview_mode: bool => load_with_overview_mode / set_load_with_overview_mode;
    save_form_data: bool => save_form_data / set_save_form_data;
    text_zoom: u32 => text_zoom / set_text_zoom;
    use_wide_viewport: bool => use_wide_viewport / set_use_wide_viewport;
    support_multiple_windows: bool => support_multiple_windows / set_support_multiple_windows;
    standard_font_family: String => standard_font_family / set_standard_font_family;
    fixed_font_family: String => fixed_font_family / set_fixed_font_family;
    sans_serif_font_family: String => sans_serif_font_family / set_sans_serif_font_family;
    serif_font_family: String => serif_font_family / set_serif_font_family;
    cursive_font_family: String => cursive_font_family / set_cursive_font_family;
    fantasy_font_family: String => fantasy_font_family / set_fantasy_font_family;
    minimum_font_size: u32 => minimum_font_size / set_minimum_font_size;
    minimum_logical_font_size: u32 => minimum_logical_font_size / set_minimum_logical_font_size;
    default_font_size: u32 => default_font_size / set_default_font_size;
    default_fixed_font_size: u32 => default_fixed_font_size / set_default_fixed_font_size;
    loads_images_automatically: bool => loads_images_automatically / set_loads_images_automatically;
    block_network_loads: bool => block_network_loads / set_block_network_loads;
    javascript_enabled: bool => javascript_enabled / set_javascript_enabled;
    allow_universal_access_from_file_urls: bool =>
        allow_universal_access_from_file_urls / set_allow_universal_access_from_file_urls;
    allow_file_access_from_file_urls: bool =>
        allow_file_access_from_file_urls / set_allow_file_access_from_file_urls;
    plugins_enabled: bool => plugins_enabled / set_plugins_enabled;
    app_cache_enabled: bool => app_cache_enabled / set_app_cache_enabled;
    app_cache_path: String => app_cache_path / set_app_cache_path;
    database_enabled: bool => database_enabled / set_database_enabled;
    dom_storage_enabled: bool => dom_storage_enabled / set_dom_storage_enabled;
    geolocation_enabled: bool => geolocation_enabled / set_geolocation_enabled;
    javascript_can_open_windows_automatically: bool =>
        javascript_can_open_windows_automatically / set_javascript_can_open_windows_automatically;
    default_text_encoding_name: String => default_text_encoding_name / set_default_text_encoding_name;
    should_focus_first_node: bool => need_initial_focus / set_need_initial_focus;
    cache_mode: CacheMode => cache_mode / set_cache_mode;
    media_playback_requires_user_gesture: bool =>
        media_playback_requires_user_gesture / set_media_playback_requires_user_gesture;
}

impl WebSettings {
    pub fn new(inner: Arc<Mutex<EngineSettings>>, default_user_agent: impl Into<Arc<str>>) -> Self {
        Self {
            inner,
            default_user_agent: default_user_agent.into(),
        }
    }

    /// Snapshot of the underlying engine settings.
    pub fn engine_settings(&self) -> EngineSettings {
        self.inner.lock().clone()
    }

    pub fn layout_algorithm(&self) -> LayoutAlgorithm {
        self.inner.lock().layout_algorithm.into()
    }

    pub fn set_layout_algorithm(&self, algorithm: LayoutAlgorithm) {
        self.inner.lock().layout_algorithm = algorithm.into();
    }

    pub fn block_network_image(&self) -> bool {
        !self.inner.lock().images_enabled
    }

    pub fn set_block_network_image(&self, block: bool) {
        self.inner.lock().images_enabled = !block;
    }

    pub fn user_agent_string(&self) -> String {
        self.inner
            .lock()
            .user_agent_string
            .clone()
            .unwrap_or_else(|| self.default_user_agent.to_string())
    }

    /// `None` or an empty string restores the default user agent.
    pub fn set_user_agent_string(&self, user_agent: Option<&str>) {
        self.inner.lock().user_agent_string = user_agent
            .filter(|ua| !ua.is_empty())
            .map(str::to_string);
    }

    /// Only `0` (reset to default) is supported.
    pub fn set_user_agent(&self, id: i32) {
        if id == 0 {
            self.set_user_agent_string(None);
        } else {
            tracing::warn!(id, "set_user_agent not supported");
        }
    }

    /// `0` while the default user agent is in effect, `-1` otherwise.
    pub fn user_agent(&self) -> i32 {
        if self.user_agent_string() == *self.default_user_agent {
            0
        } else {
            -1
        }
    }

    pub fn set_enable_smooth_transition(&self, _enable: bool) {}

    pub fn enable_smooth_transition(&self) -> bool {
        false
    }

    pub fn set_use_web_view_background_for_overscroll_background(&self, _view: bool) {}

    pub fn use_web_view_background_for_overscroll_background(&self) -> bool {
        false
    }

    pub fn set_save_password(&self, _save: bool) {}

    pub fn save_password(&self) -> bool {
        false
    }

    pub fn set_default_zoom(&self, zoom: ZoomDensity) {
        if zoom != ZoomDensity::Medium {
            tracing::warn!(?zoom, "set_default_zoom not supported");
        }
    }

    pub fn default_zoom(&self) -> ZoomDensity {
        ZoomDensity::Medium
    }

    pub fn set_light_touch_enabled(&self, _enabled: bool) {}

    pub fn light_touch_enabled(&self) -> bool {
        false
    }

    pub fn set_database_path(&self, _path: &str) {}

    pub fn database_path(&self) -> String {
        String::new()
    }

    pub fn set_geolocation_database_path(&self, _path: &str) {}

    pub fn set_app_cache_max_size(&self, _max_size: u64) {}

    pub fn set_render_priority(&self, _priority: RenderPriority) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::api_level;
    use pretty_assertions::assert_eq;

    const DEFAULT_UA: &str = "Mozilla/5.0 (Headless) WebViewBridge/1.0";

    fn settings() -> WebSettings {
        WebSettings::new(Arc::new(Mutex::new(EngineSettings::default())), DEFAULT_UA)
    }

    #[test]
    fn plain_fields_forward_to_the_engine() {
        let s = settings();
        s.set_javascript_enabled(true);
        s.set_text_zoom(150);
        s.set_fixed_font_family("Courier".to_string());
        s.set_need_initial_focus(false);
        let engine = s.engine_settings();
        assert!(engine.javascript_enabled);
        assert_eq!(engine.text_zoom, 150);
        assert_eq!(engine.fixed_font_family, "Courier");
        assert!(!engine.should_focus_first_node);
    }

    #[test]
    fn block_network_image_inverts_images_enabled() {
        let s = settings();
        assert!(!s.block_network_image());
        s.set_block_network_image(true);
        assert!(!s.engine_settings().images_enabled);
        assert!(s.block_network_image());
    }

    #[test]
    fn layout_algorithm_remaps_text_autosizing() {
        let s = settings();
        assert_eq!(s.layout_algorithm(), LayoutAlgorithm::NarrowColumns);
        s.set_layout_algorithm(LayoutAlgorithm::TextAutosizing);
        assert_eq!(
            s.engine_settings().layout_algorithm,
            EngineLayoutAlgorithm::TextAutosizing
        );
        assert_eq!(s.layout_algorithm(), LayoutAlgorithm::NarrowColumns);
        s.set_layout_algorithm(LayoutAlgorithm::SingleColumn);
        assert_eq!(s.layout_algorithm(), LayoutAlgorithm::SingleColumn);
    }

    #[test]
    fn user_agent_id_only_resets_to_default() {
        let s = settings();
        assert_eq!(s.user_agent(), 0);
        s.set_user_agent_string(Some("Custom/1.0"));
        assert_eq!(s.user_agent(), -1);
        s.set_user_agent(1);
        assert_eq!(s.user_agent_string(), "Custom/1.0");
        s.set_user_agent(0);
        assert_eq!(s.user_agent_string(), DEFAULT_UA);
        s.set_user_agent_string(Some(""));
        assert_eq!(s.user_agent(), 0);
    }

    #[test]
    fn retired_settings_are_no_ops() {
        let s = settings();
        let before = s.engine_settings();
        s.set_enable_smooth_transition(true);
        s.set_save_password(true);
        s.set_light_touch_enabled(true);
        s.set_default_zoom(ZoomDensity::Far);
        s.set_database_path("/data/db");
        s.set_render_priority(RenderPriority::High);
        s.set_app_cache_max_size(1 << 20);
        assert_eq!(s.engine_settings(), before);
        assert_eq!(s.default_zoom(), ZoomDensity::Medium);
        assert_eq!(s.database_path(), "");
        assert!(!s.save_password());
    }

    #[test]
    fn old_targets_get_file_url_access_and_quirks() {
        let options = BridgeOptions {
            target_api_level: Some(api_level::JELLY_BEAN - 1),
            ..Default::default()
        };
        let settings = EngineSettings::for_options(&options);
        assert!(settings.allow_file_access_from_file_urls);
        assert!(settings.allow_universal_access_from_file_urls);
        assert!(settings.supports_legacy_quirks);

        let modern = EngineSettings::for_options(&BridgeOptions::default());
        assert!(!modern.allow_file_access_from_file_urls);
        assert!(!modern.supports_legacy_quirks);
    }
}
