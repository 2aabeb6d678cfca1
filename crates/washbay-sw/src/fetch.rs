//! Requests, responses and the network seam.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;
use washbay_common::now_millis;
use washbay_store::CacheEntry;

use crate::config::STATIC_EXTENSIONS;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

const PLACEHOLDER_SVG: &str = concat!(
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">"#,
    r##"<rect width="200" height="200" fill="#e5e7eb"/>"##,
    r##"<text x="100" y="105" text-anchor="middle" fill="#9ca3af" font-family="sans-serif" font-size="14">Offline</text>"##,
    "</svg>"
);

const OFFLINE_HTML: &str = concat!(
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>",
    "<body><h1>You are offline</h1><p>Check your connection and try again.</p></body></html>"
);

/// Errors that can occur fetching from the network.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network unreachable")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

// ==================== Request ====================

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
}

impl RequestDestination {
    /// Script, style, image and font destinations are static assets.
    pub fn is_static_asset(&self) -> bool {
        matches!(
            self,
            RequestDestination::Script
                | RequestDestination::Style
                | RequestDestination::Image
                | RequestDestination::Font
        )
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: RequestDestination,
    pub body: Option<Bytes>,
    /// Page client that issued the request.
    pub client_id: Option<String>,
}

impl FetchRequest {
    /// Create a request.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            destination: RequestDestination::default(),
            body: None,
            client_id: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a top-level navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
    }

    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Cache key: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// Lowercased extension of the last path segment.
    pub fn extension(&self) -> Option<String> {
        let segment = self.url.path_segments()?.next_back()?;
        let (_, ext) = segment.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    /// Check if the path ends in a static-asset extension.
    pub fn has_static_extension(&self) -> bool {
        self.extension()
            .is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Check if the request is for an image.
    pub fn is_image(&self) -> bool {
        self.destination == RequestDestination::Image
            || self
                .extension()
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    }
}

/// Cache key for a URL.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Response ====================

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a response with the canonical reason phrase.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Check for a 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
            from_cache: false,
        }
    }

    pub fn is_network_error(&self) -> bool {
        self.status == 0
    }

    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: Bytes::from(entry.body.clone()),
            from_cache: true,
        }
    }

    /// Snapshot for storing under the request's cache key.
    pub fn to_cache_entry(&self, request: &FetchRequest) -> CacheEntry {
        CacheEntry {
            url: request.cache_key(),
            method: request.method.to_string(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Grey offline placeholder for image requests.
    pub fn placeholder_image() -> Self {
        Self::new(200, PLACEHOLDER_SVG).with_header("content-type", "image/svg+xml")
    }

    /// Empty client-timeout response.
    pub fn request_timeout() -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT.as_u16(), Bytes::new())
    }

    /// Synthesized page for navigations with nothing cached.
    pub fn offline_page() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE.as_u16(), OFFLINE_HTML)
            .with_header("content-type", "text/html; charset=utf-8")
    }
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

// ==================== Network ====================

/// Outbound network capability.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. `Err` means no response was obtained at all.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError>;
}

/// Network client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("Washbay/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 10,
        }
    }
}

/// `Network` over a reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    /// Create a new network client.
    pub fn new(config: NetworkConfig) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?;

        trace!(url = %request.url, status = %status, body_len = body.len(), "Response received");

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            from_cache: false,
        })
    }
}

/// Flatten response headers to one value per name.
///
/// Repeated values are joined with `, `. `set-cookie` cannot be joined that
/// way, so only its first value is kept. Non-UTF-8 values are dropped.
pub fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        match collected.get_mut(name.as_str()) {
            Some(_) if *name == http::header::SET_COOKIE => {}
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                collected.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }
    collected
}

/// In-process `Network` answering from a fixed route table.
///
/// Unknown URLs get a 404. While offline every fetch fails, and every call
/// is recorded either way.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, FetchResponse>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn route(&self, url: &str, response: FetchResponse) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), response);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        let key = request.cache_key();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        let routes = self
            .routes
            .lock()
            .map_err(|_| NetError::RequestFailed("route table poisoned".to_string()))?;
        Ok(routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(404, Bytes::new())))
    }
}
