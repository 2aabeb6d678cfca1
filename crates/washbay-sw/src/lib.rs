//! # Washbay Service Worker
//!
//! Offline-first cache and synchronization engine that sits between the
//! network and the Washbay booking pages.
//!
//! ## Features
//!
//! - **Cache generations**: versioned static / dynamic buckets, install and activate
//! - **Request routing**: network-first navigations, stale-while-revalidate assets,
//!   API passthrough
//! - **Offline writes**: durable mutation queue drained to open pages, deleted on
//!   acknowledgment
//! - **Push notifications**: defensive payload parsing, window-reuse click routing
//! - **Control channel**: typed messages between the worker and page clients
//!
//! ## Architecture
//!
//! ```text
//! Host event loop
//!     │
//!     └── ServiceWorker::handle(WorkerEvent) ──→ Handled { outcome, lifetime }
//!             ├── CacheRegistry      (install / activate)
//!             ├── RequestRouter      (fetch)
//!             ├── SyncOrchestrator   (sync / periodic sync / messages)
//!             └── NotificationCenter (push / notification click)
//!
//! Durable state:  MutationStore, BucketStore   (washbay-store)
//! Host seams:     ClientsApi, Notifier, Lifecycle, Network
//! ```
//!
//! The engine keeps no mutable state of its own between events; the host may
//! drop and rebuild it at any point.

use thiserror::Error;
use washbay_common::ConfigError;
use washbay_store::StoreError;

pub mod cache;
pub mod clients;
pub mod config;
pub mod fetch;
pub mod host;
pub mod lifecycle;
pub mod lifetime;
pub mod notification;
pub mod protocol;
pub mod router;
pub mod sync;
pub mod worker;

pub use cache::CacheRegistry;
pub use clients::{Client, ClientMatchOptions, ClientType, ClientsApi, Lifecycle, Notifier};
pub use config::{CacheNames, EngineConfig, NotificationDefaults};
pub use fetch::{
    FetchRequest, FetchResponse, NetError, Network, NetworkConfig, RequestDestination,
    RequestMode, ReqwestNetwork, ScriptedNetwork,
};
pub use host::MemoryHost;
pub use lifecycle::{Registration, ServiceWorkerState, WorkerVersion};
pub use lifetime::ExtendableEvent;
pub use notification::{
    ClickOutcome, Notification, NotificationAction, NotificationCenter, NotificationClick,
    NotificationOptions, NotificationPayload,
};
pub use protocol::ControlMessage;
pub use router::{FetchOutcome, PassthroughReason, RequestRouter, Route};
pub use sync::{DrainReport, SyncOrchestrator};
pub use worker::{EventOutcome, Handled, MessageOutcome, ServiceWorker, WorkerBuilder, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur while handling worker events.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Install failed for {asset}: {reason}")]
    InstallFailed { asset: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl EngineError {
    /// Create a client error.
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create a notification error.
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Check if the host should retry the triggering event later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::Unavailable(_))
                | EngineError::Network(_)
                | EngineError::InstallFailed { .. }
        )
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InstallFailed { .. } => "install",
            EngineError::Store(_) => "store",
            EngineError::Network(_) => "network",
            EngineError::Client(_) => "client",
            EngineError::Notification(_) => "notification",
            EngineError::InvalidMessage(_) => "message",
            EngineError::Config(_) => "config",
            EngineError::Url(_) => "url",
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(EngineError::client("gone").category(), "client");
        assert_eq!(
            EngineError::Store(StoreError::unavailable("down")).category(),
            "store"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::Store(StoreError::unavailable("down")).is_retryable());
        assert!(EngineError::InstallFailed {
            asset: "/".into(),
            reason: "offline".into()
        }
        .is_retryable());
        assert!(!EngineError::InvalidMessage("bad".into()).is_retryable());
        assert!(!EngineError::client("gone").is_retryable());
    }
}
