//! Event dispatcher.
//!
//! One entry point for every host event. The worker holds only shared
//! handles, so any number of events may be in flight at once and the whole
//! value may be rebuilt between events.

use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};
use washbay_store::{BucketStore, MutationId, MutationStore};

use crate::cache::CacheRegistry;
use crate::clients::{ClientsApi, Lifecycle, Notifier};
use crate::config::EngineConfig;
use crate::fetch::{FetchRequest, Network};
use crate::lifetime::ExtendableEvent;
use crate::notification::{ClickOutcome, Notification, NotificationCenter, NotificationClick};
use crate::protocol::ControlMessage;
use crate::router::{FetchOutcome, RequestRouter};
use crate::sync::{DrainReport, SyncOrchestrator};
use crate::{EngineError, EngineResult};

// ==================== Events ====================

/// An event delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchRequest),
    /// One-off background sync after connectivity returns.
    Sync { tag: String },
    PeriodicSync { tag: String },
    Push { data: Option<Bytes> },
    NotificationClick(NotificationClick),
    /// Control message from a page. `source` is the sending client.
    Message {
        source: Option<String>,
        data: JsonValue,
    },
}

impl WorkerEvent {
    /// Event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Sync { .. } => "sync",
            WorkerEvent::PeriodicSync { .. } => "periodicsync",
            WorkerEvent::Push { .. } => "push",
            WorkerEvent::NotificationClick(_) => "notificationclick",
            WorkerEvent::Message { .. } => "message",
        }
    }
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed { assets: usize },
    Activated { deleted: Vec<String> },
    Fetch(FetchOutcome),
    Synced(DrainReport),
    /// Sync tag not ours.
    SyncIgnored,
    Displayed(Notification),
    Clicked(ClickOutcome),
    Message(MessageOutcome),
}

/// Result of a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    SkippedWaiting,
    Acknowledged(MutationId),
    /// Count computed, and posted back if the sender was known.
    ReportedCount(usize),
    Drained(DrainReport),
    Ignored,
}

/// A handled event. The host must keep the worker alive until
/// `lifetime.settle()` completes.
#[derive(Debug)]
pub struct Handled {
    pub outcome: EventOutcome,
    pub lifetime: ExtendableEvent,
}

impl Handled {
    /// Wait for background work and return the outcome.
    pub async fn settle(self) -> EventOutcome {
        self.lifetime.settle().await;
        self.outcome
    }
}

// ==================== Worker ====================

/// The offline engine.
pub struct ServiceWorker {
    config: Arc<EngineConfig>,
    registry: CacheRegistry,
    router: RequestRouter,
    sync: SyncOrchestrator,
    notifications: NotificationCenter,
    clients: Arc<dyn ClientsApi>,
    lifecycle: Arc<dyn Lifecycle>,
}

impl ServiceWorker {
    /// Start building a worker.
    pub fn builder(config: EngineConfig) -> WorkerBuilder {
        WorkerBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn sync(&self) -> &SyncOrchestrator {
        &self.sync
    }

    /// Handle one event.
    pub async fn handle(&self, event: WorkerEvent) -> EngineResult<Handled> {
        let lifetime = ExtendableEvent::new(event.kind());
        debug!(event = event.kind(), "Dispatching event");

        let outcome = match event {
            WorkerEvent::Install => EventOutcome::Installed {
                assets: self.registry.install().await?,
            },
            WorkerEvent::Activate => EventOutcome::Activated {
                deleted: self.registry.activate().await?,
            },
            WorkerEvent::Fetch(request) => {
                EventOutcome::Fetch(self.router.handle(&request, &lifetime).await)
            }
            WorkerEvent::Sync { tag } => self.on_sync(&tag, &self.config.sync_tag).await?,
            WorkerEvent::PeriodicSync { tag } => {
                self.on_sync(&tag, &self.config.periodic_sync_tag).await?
            }
            WorkerEvent::Push { data } => {
                EventOutcome::Displayed(self.notifications.show_push(data.as_deref()).await?)
            }
            WorkerEvent::NotificationClick(click) => {
                EventOutcome::Clicked(self.notifications.handle_click(&click).await?)
            }
            WorkerEvent::Message { source, data } => {
                EventOutcome::Message(self.on_message(source.as_deref(), &data).await?)
            }
        };

        Ok(Handled { outcome, lifetime })
    }

    async fn on_sync(&self, tag: &str, expected: &str) -> EngineResult<EventOutcome> {
        if tag != expected {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(EventOutcome::SyncIgnored);
        }
        info!(tag, "Sync triggered");
        Ok(EventOutcome::Synced(self.sync.drain().await?))
    }

    async fn on_message(
        &self,
        source: Option<&str>,
        data: &JsonValue,
    ) -> EngineResult<MessageOutcome> {
        let message = match ControlMessage::from_json(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(source = ?source, error = %e, "Ignoring control message");
                return Ok(MessageOutcome::Ignored);
            }
        };
        debug!(source = ?source, kind = message.kind(), "Control message");

        match message {
            ControlMessage::SkipWaiting => {
                self.lifecycle.skip_waiting().await?;
                Ok(MessageOutcome::SkippedWaiting)
            }
            ControlMessage::BookingSynced { offline_id } => {
                self.sync.acknowledge(offline_id).await?;
                Ok(MessageOutcome::Acknowledged(offline_id))
            }
            ControlMessage::GetPendingCount => {
                let count = self.sync.pending_count().await?;
                match source {
                    Some(client) => {
                        let reply = ControlMessage::PendingCount { count };
                        self.clients.post_message(client, &reply).await?;
                    }
                    None => warn!(count, "Pending count requested without a reply address"),
                }
                Ok(MessageOutcome::ReportedCount(count))
            }
            ControlMessage::TriggerSync => Ok(MessageOutcome::Drained(self.sync.drain().await?)),
            ControlMessage::SyncBooking { .. } | ControlMessage::PendingCount { .. } => {
                debug!(kind = message.kind(), "Ignoring outbound-only message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }
}

// ==================== Builder ====================

/// Assembles a `ServiceWorker` from its stores and host seams.
pub struct WorkerBuilder {
    config: EngineConfig,
    mutations: Option<Arc<dyn MutationStore>>,
    buckets: Option<Arc<dyn BucketStore>>,
    network: Option<Arc<dyn Network>>,
    clients: Option<Arc<dyn ClientsApi>>,
    notifier: Option<Arc<dyn Notifier>>,
    lifecycle: Option<Arc<dyn Lifecycle>>,
}

impl WorkerBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            mutations: None,
            buckets: None,
            network: None,
            clients: None,
            notifier: None,
            lifecycle: None,
        }
    }

    pub fn mutations(mut self, store: Arc<dyn MutationStore>) -> Self {
        self.mutations = Some(store);
        self
    }

    pub fn buckets(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.buckets = Some(store);
        self
    }

    /// Use one value for both stores.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: MutationStore + BucketStore + 'static,
    {
        let mutations: Arc<dyn MutationStore> = store.clone();
        self.mutations(mutations).buckets(store)
    }

    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn clients(mut self, clients: Arc<dyn ClientsApi>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Use one value for every host capability.
    pub fn host<H>(self, host: Arc<H>) -> Self
    where
        H: ClientsApi + Notifier + Lifecycle + 'static,
    {
        let clients: Arc<dyn ClientsApi> = host.clone();
        let notifier: Arc<dyn Notifier> = host.clone();
        self.clients(clients).notifier(notifier).lifecycle(host)
    }

    /// Validate the config and wire the handlers.
    pub fn build(self) -> EngineResult<ServiceWorker> {
        self.config.validate()?;

        let mutations = require(self.mutations, "mutation store")?;
        let buckets = require(self.buckets, "bucket store")?;
        let network = require(self.network, "network")?;
        let clients = require(self.clients, "clients api")?;
        let notifier = require(self.notifier, "notifier")?;
        let lifecycle = require(self.lifecycle, "lifecycle")?;
        let config = Arc::new(self.config);

        Ok(ServiceWorker {
            registry: CacheRegistry::new(
                Arc::clone(&config),
                Arc::clone(&buckets),
                Arc::clone(&network),
                Arc::clone(&clients),
                Arc::clone(&lifecycle),
            ),
            router: RequestRouter::new(Arc::clone(&config), buckets, network),
            sync: SyncOrchestrator::new(
                mutations,
                Arc::clone(&clients),
                config.max_delivery_attempts,
            ),
            notifications: NotificationCenter::new(
                Arc::clone(&config),
                Arc::clone(&clients),
                notifier,
            ),
            config,
            clients,
            lifecycle,
        })
    }
}

fn require<T>(value: Option<T>, what: &str) -> EngineResult<T> {
    value.ok_or_else(|| {
        EngineError::Config(washbay_common::ConfigError::invalid(format!(
            "worker built without a {what}"
        )))
    })
}
