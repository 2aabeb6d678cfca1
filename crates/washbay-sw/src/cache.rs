//! Versioned cache generations.
//!
//! Install precaches the app shell into the current static bucket; activate
//! deletes every older bucket this app owns and claims open pages.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use washbay_store::BucketStore;

use crate::clients::{ClientsApi, Lifecycle};
use crate::config::{CacheNames, EngineConfig};
use crate::fetch::{FetchRequest, Network};
use crate::{EngineError, EngineResult};

/// Install / activate handlers for one cache generation.
pub struct CacheRegistry {
    config: Arc<EngineConfig>,
    buckets: Arc<dyn BucketStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientsApi>,
    lifecycle: Arc<dyn Lifecycle>,
}

impl CacheRegistry {
    pub fn new(
        config: Arc<EngineConfig>,
        buckets: Arc<dyn BucketStore>,
        network: Arc<dyn Network>,
        clients: Arc<dyn ClientsApi>,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> Self {
        Self {
            config,
            buckets,
            network,
            clients,
            lifecycle,
        }
    }

    /// Current bucket names.
    pub fn names(&self) -> CacheNames {
        self.config.cache_names()
    }

    /// Precache every app-shell asset, then skip waiting.
    ///
    /// All assets are fetched before any is stored, so a single failure
    /// leaves the static bucket untouched and the install failed.
    pub async fn install(&self) -> EngineResult<usize> {
        let names = self.names();
        info!(
            bucket = %names.static_bucket,
            assets = self.config.app_shell.len(),
            "Installing app shell"
        );

        let fetches = self
            .config
            .app_shell
            .iter()
            .map(|asset| self.fetch_asset(asset));
        let entries = try_join_all(fetches).await.inspect_err(|e| {
            warn!(error = %e, "Install failed");
        })?;

        let count = entries.len();
        self.buckets.put_all(&names.static_bucket, entries).await?;
        self.lifecycle.skip_waiting().await?;

        info!(bucket = %names.static_bucket, count, "App shell installed");
        Ok(count)
    }

    async fn fetch_asset(&self, asset: &str) -> EngineResult<washbay_store::CacheEntry> {
        let url = self.config.resolve(asset)?;
        let request = FetchRequest::get(url);
        let response =
            self.network
                .fetch(&request)
                .await
                .map_err(|e| EngineError::InstallFailed {
                    asset: asset.to_string(),
                    reason: e.to_string(),
                })?;

        if !response.ok() {
            return Err(EngineError::InstallFailed {
                asset: asset.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        debug!(asset, status = response.status, "Precached asset");
        Ok(response.to_cache_entry(&request))
    }

    /// Delete stale generations, then claim clients. Returns the deleted
    /// bucket names.
    ///
    /// Only buckets prefixed with this app's name are considered; the
    /// current static and dynamic buckets always exist afterwards.
    pub async fn activate(&self) -> EngineResult<Vec<String>> {
        let names = self.names();
        let mut deleted = Vec::new();

        for name in self.buckets.names().await? {
            if !self.config.owns_bucket(&name) || names.is_current(&name) {
                continue;
            }
            if self.buckets.delete(&name).await? {
                info!(bucket = %name, "Deleted stale cache");
                deleted.push(name);
            }
        }

        for name in names.all() {
            self.buckets.open(name).await?;
        }

        self.clients.claim().await?;
        info!(version = %self.config.version, deleted = deleted.len(), "Activated");
        Ok(deleted)
    }
}
