//! Host capabilities the engine drives: page clients, the notification
//! tray and the worker's own lifecycle.

use async_trait::async_trait;
use url::Url;

use crate::notification::Notification;
use crate::protocol::ControlMessage;
use crate::EngineResult;

// ==================== Client ====================

/// A page (or worker) the host knows about.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether this worker controls the client.
    pub controlled: bool,

    /// Whether focused.
    pub focused: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl ClientType {
    /// Check whether a client of type `other` matches this filter.
    pub fn matches(&self, other: ClientType) -> bool {
        *self == ClientType::All || *self == other
    }
}

/// Options for `match_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every open window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }
}

// ==================== Capabilities ====================

/// Page clients API.
#[async_trait]
pub trait ClientsApi: Send + Sync {
    /// List clients.
    async fn match_all(&self, options: ClientMatchOptions) -> EngineResult<Vec<Client>>;

    /// Post a control message to one client.
    async fn post_message(&self, client_id: &str, message: &ControlMessage) -> EngineResult<()>;

    /// Navigate a window client.
    async fn navigate(&self, client_id: &str, url: &Url) -> EngineResult<()>;

    /// Focus a window client.
    async fn focus(&self, client_id: &str) -> EngineResult<()>;

    /// Open a new window. `None` if the host declined.
    async fn open_window(&self, url: &Url) -> EngineResult<Option<Client>>;

    /// Take control of every in-scope client.
    async fn claim(&self) -> EngineResult<()>;
}

/// System notification tray.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification) -> EngineResult<()>;

    /// Close the notifications carrying `tag`.
    async fn close(&self, tag: &str) -> EngineResult<()>;
}

/// The worker's control over its own registration.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Activate as soon as install completes, replacing the active worker.
    async fn skip_waiting(&self) -> EngineResult<()>;
}
