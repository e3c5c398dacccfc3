//! Process-wide engine services handed out by the bootstrap gate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

pub trait CookieStore: Send + Sync {
    fn set_accept_cookie(&self, accept: bool);
    fn accept_cookie(&self) -> bool;
    /// Store a `Set-Cookie` style value (`name=value; attrs`) for `url`.
    fn set_cookie(&self, url: &str, value: &str);
    /// Cookie header for `url`, `None` when nothing is stored.
    fn cookie(&self, url: &str) -> Option<String>;
    fn remove_all_cookies(&self);
    fn has_cookies(&self) -> bool;
}

pub trait WebStorage: Send + Sync {
    fn origins(&self) -> Vec<String>;
    fn usage_for_origin(&self, origin: &str) -> u64;
    fn record_usage(&self, origin: &str, bytes: u64);
    fn delete_origin(&self, origin: &str);
    fn delete_all_data(&self);
}

pub trait GeolocationStore: Send + Sync {
    fn allow(&self, origin: &str);
    fn clear(&self, origin: &str);
    fn clear_all(&self);
    fn is_allowed(&self, origin: &str) -> bool;
}

/// Per-process browsing state shared by every contents.
pub struct BrowserContext {
    geolocation: Arc<dyn GeolocationStore>,
}

impl BrowserContext {
    pub fn new(geolocation: Arc<dyn GeolocationStore>) -> Self {
        Self { geolocation }
    }

    pub fn geolocation_permissions(&self) -> Arc<dyn GeolocationStore> {
        self.geolocation.clone()
    }
}

/// Extract the origin (scheme + host + port) from a URL string.
///
/// Returns `None` for malformed URLs and opaque origins (`data:`, `file:`,
/// custom schemes). Scheme and host come back lowercased and default ports
/// are dropped.
pub fn extract_origin(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let serialized = parsed.origin().ascii_serialization();
    if serialized == "null" {
        return None;
    }
    Some(serialized)
}

fn cookie_host(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    parsed.host_str().map(str::to_ascii_lowercase)
}

/// In-memory cookie jar keyed by host.
pub struct InMemoryCookieStore {
    accept: Mutex<bool>,
    jar: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl InMemoryCookieStore {
    pub fn new() -> Self {
        Self {
            accept: Mutex::new(true),
            jar: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCookieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieStore for InMemoryCookieStore {
    fn set_accept_cookie(&self, accept: bool) {
        *self.accept.lock() = accept;
    }

    fn accept_cookie(&self) -> bool {
        *self.accept.lock()
    }

    fn set_cookie(&self, url: &str, value: &str) {
        if !self.accept_cookie() {
            return;
        }
        let Some(host) = cookie_host(url) else {
            tracing::debug!(url, "ignoring cookie for url without host");
            return;
        };
        let pair = value.split(';').next().unwrap_or_default();
        let Some((name, val)) = pair.split_once('=') else {
            return;
        };
        let (name, val) = (name.trim().to_string(), val.trim().to_string());
        let mut jar = self.jar.lock();
        let cookies = jar.entry(host).or_default();
        match cookies.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = val,
            None => cookies.push((name, val)),
        }
    }

    fn cookie(&self, url: &str) -> Option<String> {
        let host = cookie_host(url)?;
        let jar = self.jar.lock();
        let cookies = jar.get(&host).filter(|c| !c.is_empty())?;
        Some(
            cookies
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn remove_all_cookies(&self) {
        self.jar.lock().clear();
    }

    fn has_cookies(&self) -> bool {
        self.jar.lock().values().any(|c| !c.is_empty())
    }
}

#[derive(Default)]
pub struct InMemoryWebStorage {
    usage: Mutex<HashMap<String, u64>>,
}

impl WebStorage for InMemoryWebStorage {
    fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self.usage.lock().keys().cloned().collect();
        origins.sort();
        origins
    }

    fn usage_for_origin(&self, origin: &str) -> u64 {
        extract_origin(origin)
            .and_then(|o| self.usage.lock().get(&o).copied())
            .unwrap_or(0)
    }

    fn record_usage(&self, origin: &str, bytes: u64) {
        if let Some(origin) = extract_origin(origin) {
            *self.usage.lock().entry(origin).or_insert(0) += bytes;
        }
    }

    fn delete_origin(&self, origin: &str) {
        if let Some(origin) = extract_origin(origin) {
            self.usage.lock().remove(&origin);
        }
    }

    fn delete_all_data(&self) {
        self.usage.lock().clear();
    }
}

#[derive(Default)]
pub struct InMemoryGeolocationStore {
    allowed: Mutex<HashSet<String>>,
}

impl GeolocationStore for InMemoryGeolocationStore {
    fn allow(&self, origin: &str) {
        if let Some(origin) = extract_origin(origin) {
            self.allowed.lock().insert(origin);
        }
    }

    fn clear(&self, origin: &str) {
        if let Some(origin) = extract_origin(origin) {
            self.allowed.lock().remove(&origin);
        }
    }

    fn clear_all(&self) {
        self.allowed.lock().clear();
    }

    fn is_allowed(&self, origin: &str) -> bool {
        extract_origin(origin).is_some_and(|o| self.allowed.lock().contains(&o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn origin_is_normalized() {
        assert_eq!(
            extract_origin("HTTPS://Example.Com:443/path?q=1").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            extract_origin("http://example.com:8080/").as_deref(),
            Some("http://example.com:8080")
        );
        assert_eq!(extract_origin("data:text/html,hi"), None);
        assert_eq!(extract_origin("not a url"), None);
    }

    #[test]
    fn cookies_are_scoped_by_host_and_replaced_by_name() {
        let store = InMemoryCookieStore::new();
        store.set_cookie("https://a.test/x", "session=1; Path=/");
        store.set_cookie("https://a.test/y", "theme=dark");
        store.set_cookie("https://a.test/", "session=2");
        assert_eq!(store.cookie("https://a.test/").as_deref(), Some("session=2; theme=dark"));
        assert_eq!(store.cookie("https://b.test/"), None);
        assert!(store.has_cookies());
        store.remove_all_cookies();
        assert!(!store.has_cookies());
    }

    #[test]
    fn refusing_cookies_drops_writes() {
        let store = InMemoryCookieStore::new();
        store.set_accept_cookie(false);
        store.set_cookie("https://a.test/", "a=b");
        assert!(!store.has_cookies());
    }

    #[test]
    fn geolocation_grants_match_normalized_origins() {
        let store = InMemoryGeolocationStore::default();
        store.allow("https://maps.test/some/page");
        assert!(store.is_allowed("https://MAPS.test:443/"));
        store.clear("https://maps.test");
        assert!(!store.is_allowed("https://maps.test/"));
    }

    #[test]
    fn storage_usage_accumulates_per_origin() {
        let storage = InMemoryWebStorage::default();
        storage.record_usage("https://a.test/page", 10);
        storage.record_usage("https://a.test/other", 5);
        storage.record_usage("https://b.test/", 1);
        assert_eq!(storage.usage_for_origin("https://a.test"), 15);
        assert_eq!(storage.origins(), vec!["https://a.test", "https://b.test"]);
        storage.delete_origin("https://a.test/");
        assert_eq!(storage.usage_for_origin("https://a.test"), 0);
    }
}
