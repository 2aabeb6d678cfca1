//! Fetch routing.
//!
//! Every intercepted request is classified once, in this order, and then
//! served by the matching strategy:
//!
//! ```text
//! non-GET ............................ passthrough
//! backend API (prefix or host) ....... passthrough
//! cross-origin, not allow-listed ..... passthrough
//! navigation ......................... network-first → dynamic → offline doc → root → 503
//! script/style/image/font ............ cache-first, revalidate in background
//! anything else ...................... network-first → any bucket → network error
//! ```
//!
//! Strategies never fail: cache errors degrade to misses and network errors
//! to the documented fallbacks.

use std::sync::Arc;
use tracing::{debug, trace, warn};
use washbay_store::{BucketStore, CacheEntry};

use crate::config::EngineConfig;
use crate::fetch::{cache_key, FetchRequest, FetchResponse, Network, RequestMode};
use crate::lifetime::ExtendableEvent;

/// Why a request bypasses the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    NonGet,
    Api,
    CrossOrigin,
}

/// Routing class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Passthrough(PassthroughReason),
    Navigation,
    StaticAsset,
    Default,
}

/// Result of routing a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself.
    Passthrough(PassthroughReason),
    Respond(FetchResponse),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough(_) => None,
        }
    }

    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough(_) => None,
        }
    }
}

/// Classifies requests and runs the caching strategies.
#[derive(Clone)]
pub struct RequestRouter {
    config: Arc<EngineConfig>,
    buckets: Arc<dyn BucketStore>,
    network: Arc<dyn Network>,
}

impl RequestRouter {
    pub fn new(
        config: Arc<EngineConfig>,
        buckets: Arc<dyn BucketStore>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            config,
            buckets,
            network,
        }
    }

    /// Classify a request.
    pub fn classify(&self, request: &FetchRequest) -> Route {
        if request.method != http::Method::GET {
            return Route::Passthrough(PassthroughReason::NonGet);
        }
        if self.config.is_backend_request(&request.url) {
            return Route::Passthrough(PassthroughReason::Api);
        }
        if !self.config.is_same_origin(&request.url) && !self.config.is_cacheable_host(&request.url)
        {
            return Route::Passthrough(PassthroughReason::CrossOrigin);
        }
        if request.mode == RequestMode::Navigate {
            return Route::Navigation;
        }
        if request.destination.is_static_asset() || request.has_static_extension() {
            return Route::StaticAsset;
        }
        Route::Default
    }

    /// Route and serve a request. Background revalidation is attached to
    /// `event`.
    pub async fn handle(&self, request: &FetchRequest, event: &ExtendableEvent) -> FetchOutcome {
        let route = self.classify(request);
        trace!(url = %request.url, ?route, "Routing fetch");

        let response = match route {
            Route::Passthrough(reason) => {
                debug!(url = %request.url, ?reason, "Passing request through");
                return FetchOutcome::Passthrough(reason);
            }
            Route::Navigation => self.network_first_navigation(request).await,
            Route::StaticAsset => self.cache_first(request, event).await,
            Route::Default => self.network_first(request).await,
        };
        FetchOutcome::Respond(response)
    }

    // ==================== Strategies ====================

    async fn network_first_navigation(&self, request: &FetchRequest) -> FetchResponse {
        let dynamic = self.config.cache_names().dynamic_bucket;

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&dynamic, response.to_cache_entry(request)).await;
                }
                return response;
            }
            Err(e) => debug!(url = %request.url, error = %e, "Navigation offline"),
        }

        if let Some(hit) = self.lookup_in(&dynamic, &request.cache_key()).await {
            return hit;
        }
        for document in [&self.config.offline_document, &self.config.root_document] {
            let Ok(url) = self.config.resolve(document) else {
                continue;
            };
            if let Some(hit) = self.lookup_any(&cache_key(&url)).await {
                return hit;
            }
        }
        warn!(url = %request.url, "No offline document cached");
        FetchResponse::offline_page()
    }

    async fn cache_first(&self, request: &FetchRequest, event: &ExtendableEvent) -> FetchResponse {
        let names = self.config.cache_names();
        let key = request.cache_key();

        for bucket in names.all() {
            if let Some(hit) = self.lookup_in(bucket, &key).await {
                let router = self.clone();
                let request = request.clone();
                let bucket = bucket.to_string();
                event.wait_until(async move { router.revalidate(&request, &bucket).await });
                return hit;
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&names.dynamic_bucket, response.to_cache_entry(request))
                        .await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Static asset unavailable");
                if request.is_image() {
                    FetchResponse::placeholder_image()
                } else {
                    FetchResponse::request_timeout()
                }
            }
        }
    }

    /// Refresh a cached entry in place. Failures leave the stale copy.
    async fn revalidate(&self, request: &FetchRequest, bucket: &str) {
        match self.network.fetch(request).await {
            Ok(response) if response.ok() => {
                self.store(bucket, response.to_cache_entry(request)).await;
                trace!(url = %request.url, bucket, "Revalidated");
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Revalidation skipped");
            }
            Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed"),
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup_any(&request.cache_key()).await {
                    Some(hit) => hit,
                    None => FetchResponse::network_error(),
                }
            }
        }
    }

    // ==================== Cache access ====================

    async fn lookup_in(&self, bucket: &str, key: &str) -> Option<FetchResponse> {
        match self.buckets.match_in(bucket, key).await {
            Ok(hit) => hit.as_ref().map(FetchResponse::from_cache),
            Err(e) => {
                warn!(bucket, key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn lookup_any(&self, key: &str) -> Option<FetchResponse> {
        match self.buckets.match_any(key).await {
            Ok(hit) => hit.as_ref().map(FetchResponse::from_cache),
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn store(&self, bucket: &str, entry: CacheEntry) {
        let url = entry.url.clone();
        if let Err(e) = self.buckets.put(bucket, entry).await {
            warn!(bucket, url = %url, error = %e, "Cache write failed");
        }
    }
}
