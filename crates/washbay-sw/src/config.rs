//! Engine configuration.
//!
//! Everything the worker needs to know about the app it serves: cache
//! naming, the app shell, which requests belong to the backend, and the
//! notification fallbacks. Loaded from JSON with field-level defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::{EngineError, EngineResult};

const STATIC_INFIX: &str = "static";
const DYNAMIC_INFIX: &str = "dynamic";

/// Static-asset extensions served cache-first.
pub const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "otf",
];

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix shared by every bucket this app owns.
    pub app_name: String,

    /// Cache generation tag. Bumping it invalidates every bucket.
    pub version: String,

    /// Origin the worker is registered for.
    pub origin: Url,

    /// Paths precached on install.
    pub app_shell: Vec<String>,

    /// Document served to navigations when offline.
    pub offline_document: String,

    /// Last-resort navigation fallback.
    pub root_document: String,

    /// Path fragment identifying backend API calls.
    pub api_prefix: String,

    /// Backend hosts (suffix match) that are never cached.
    pub backend_hosts: Vec<String>,

    /// Cross-origin hosts whose assets may be cached.
    pub cacheable_hosts: Vec<String>,

    /// Background sync tag that drains the mutation queue.
    pub sync_tag: String,

    /// Periodic sync tag that drains the mutation queue.
    pub periodic_sync_tag: String,

    /// Dead-letter a mutation after this many delivered drains. `None` keeps
    /// it forever.
    pub max_delivery_attempts: Option<u32>,

    /// Notification fallbacks.
    pub notifications: NotificationDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "washbay".to_string(),
            version: "v1".to_string(),
            origin: default_origin(),
            app_shell: vec![
                "/".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            offline_document: "/offline.html".to_string(),
            root_document: "/".to_string(),
            api_prefix: "/api/".to_string(),
            backend_hosts: vec!["supabase.co".to_string()],
            cacheable_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            sync_tag: "sync-bookings".to_string(),
            periodic_sync_tag: "check-pending-bookings".to_string(),
            max_delivery_attempts: None,
            notifications: NotificationDefaults::default(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:3000").expect("default origin is a valid URL")
}

/// Fallback notification presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Where a click lands when the payload names no URL.
    pub click_url: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Washbay".to_string(),
            body: "You have a new update".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            tag: "washbay-notification".to_string(),
            click_url: "/dashboard".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

/// Bucket names for the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_bucket: String,
    pub dynamic_bucket: String,
}

impl CacheNames {
    /// Check if `name` is one of the current generation's buckets.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_bucket || name == self.dynamic_bucket
    }

    /// Both names, static first.
    pub fn all(&self) -> [&str; 2] {
        [&self.static_bucket, &self.dynamic_bucket]
    }
}

impl EngineConfig {
    /// Load from an optional JSON file and validate.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let config: Self = washbay_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot work with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(invalid("app_name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("version must not be empty"));
        }
        if !self.api_prefix.starts_with('/') {
            return Err(invalid("api_prefix must start with '/'"));
        }
        if self.sync_tag.is_empty() || self.periodic_sync_tag.is_empty() {
            return Err(invalid("sync tags must not be empty"));
        }
        if self.max_delivery_attempts == Some(0) {
            return Err(invalid("max_delivery_attempts must be at least 1"));
        }
        for path in self
            .app_shell
            .iter()
            .chain([&self.offline_document, &self.root_document])
            .chain([&self.notifications.click_url])
        {
            self.resolve(path)?;
        }
        Ok(())
    }

    /// Names of the current static and dynamic buckets.
    pub fn cache_names(&self) -> CacheNames {
        CacheNames {
            static_bucket: format!("{}-{}-{}", self.app_name, STATIC_INFIX, self.version),
            dynamic_bucket: format!("{}-{}-{}", self.app_name, DYNAMIC_INFIX, self.version),
        }
    }

    /// Check if a bucket belongs to this application (any generation).
    pub fn owns_bucket(&self, name: &str) -> bool {
        name.strip_prefix(self.app_name.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Resolve a path or URL against the origin.
    pub fn resolve(&self, path: &str) -> EngineResult<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Check if a URL shares the worker's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Check if a URL addresses the backend API.
    pub fn is_backend_request(&self, url: &Url) -> bool {
        if url.path().contains(self.api_prefix.as_str()) {
            return true;
        }
        url.host_str()
            .is_some_and(|host| self.backend_hosts.iter().any(|h| host_matches(host, h)))
    }

    /// Check if a cross-origin URL may still be cached.
    pub fn is_cacheable_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.cacheable_hosts.iter().any(|h| host == h))
    }
}

fn host_matches(host: &str, suffix: &str) -> bool {
    host == suffix
        || host
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with('.'))
}

fn invalid(msg: &str) -> EngineError {
    EngineError::Config(washbay_common::ConfigError::invalid(msg))
}
