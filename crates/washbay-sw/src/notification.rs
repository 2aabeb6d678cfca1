//! Push notification rendering and click routing.
//!
//! Push payloads arrive in several shapes and are parsed defensively:
//!
//! ```text
//! {"notification": {"title": ..}, "data": {..}}   wrapped
//! {"title": .., "body": .., "data": {..}}         flat
//! "Your car is ready"                              plain text → body
//! (empty)                                          defaults only
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientsApi, Notifier};
use crate::config::{EngineConfig, NotificationDefaults};
use crate::EngineResult;

/// Action id that closes the notification without opening anything.
pub const DISMISS_ACTION: &str = "dismiss";
/// Action id that opens the target URL.
pub const OPEN_ACTION: &str = "open";

// ==================== Payload ====================

/// Fields recovered from a push payload. Absent fields fall back to the
/// configured defaults when rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub data: Option<JsonValue>,
}

impl NotificationPayload {
    /// Parse raw push data. Never fails.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(bytes) = data.filter(|b| !b.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(JsonValue::Object(map)) => Self::from_object(&map),
            Ok(JsonValue::String(text)) => Self::from_text(&text),
            _ => Self::from_text(&String::from_utf8_lossy(bytes)),
        }
    }

    fn from_text(text: &str) -> Self {
        let text = text.trim();
        Self {
            body: (!text.is_empty()).then(|| text.to_string()),
            ..Default::default()
        }
    }

    fn from_object(map: &Map<String, JsonValue>) -> Self {
        let wrapper = map.get("notification").and_then(JsonValue::as_object);
        let field = |name: &str| {
            wrapper
                .and_then(|w| w.get(name))
                .or_else(|| map.get(name))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };

        Self {
            title: field("title"),
            body: field("body"),
            icon: field("icon"),
            badge: field("badge"),
            tag: field("tag"),
            data: map
                .get("data")
                .or_else(|| wrapper.and_then(|w| w.get("data")))
                .cloned(),
        }
    }

    /// Fill gaps from `defaults`.
    pub fn render(self, defaults: &NotificationDefaults) -> Notification {
        Notification {
            title: self.title.unwrap_or_else(|| defaults.title.clone()),
            options: NotificationOptions {
                body: self.body.unwrap_or_else(|| defaults.body.clone()),
                icon: self.icon.unwrap_or_else(|| defaults.icon.clone()),
                badge: self.badge.unwrap_or_else(|| defaults.badge.clone()),
                tag: self.tag.unwrap_or_else(|| defaults.tag.clone()),
                data: self.data.unwrap_or_else(|| JsonValue::Object(Map::new())),
                vibrate: defaults.vibrate.clone(),
                require_interaction: true,
                actions: vec![
                    NotificationAction::new(OPEN_ACTION, "Open"),
                    NotificationAction::new(DISMISS_ACTION, "Dismiss"),
                ],
            },
        }
    }
}

// ==================== Notification ====================

/// A notification ready for the tray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: JsonValue,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
        }
    }
}

/// A click on a shown notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    pub tag: String,
    /// Action button id; `None` for a click on the body.
    pub action: Option<String>,
    pub data: JsonValue,
}

impl NotificationClick {
    /// Click on the body of `notification`.
    pub fn on(notification: &Notification) -> Self {
        Self {
            tag: notification.options.tag.clone(),
            action: None,
            data: notification.options.data.clone(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Where a click ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    /// An existing window was navigated and focused.
    Focused { client_id: String },
    /// A new window was requested.
    Opened { client_id: Option<String> },
}

// ==================== Center ====================

/// Shows push notifications and routes clicks to windows.
pub struct NotificationCenter {
    config: Arc<EngineConfig>,
    clients: Arc<dyn ClientsApi>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationCenter {
    pub fn new(
        config: Arc<EngineConfig>,
        clients: Arc<dyn ClientsApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            clients,
            notifier,
        }
    }

    /// Render and display a push payload.
    pub async fn show_push(&self, data: Option<&[u8]>) -> EngineResult<Notification> {
        let notification = NotificationPayload::parse(data).render(&self.config.notifications);
        self.notifier.show(&notification).await?;
        info!(title = %notification.title, tag = %notification.options.tag, "Notification shown");
        Ok(notification)
    }

    /// Close the notification, then focus or open the target window.
    pub async fn handle_click(&self, click: &NotificationClick) -> EngineResult<ClickOutcome> {
        if let Err(e) = self.notifier.close(&click.tag).await {
            warn!(tag = %click.tag, error = %e, "Failed to close notification");
        }

        if click.action.as_deref() == Some(DISMISS_ACTION) {
            debug!(tag = %click.tag, "Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let target = self.target_url(&click.data)?;
        let windows = self.clients.match_all(ClientMatchOptions::all_windows()).await?;

        if let Some(client) = windows.iter().find(|c| self.config.is_same_origin(&c.url)) {
            self.clients.navigate(&client.id, &target).await?;
            self.clients.focus(&client.id).await?;
            info!(client = %client.id, url = %target, "Focused existing window");
            return Ok(ClickOutcome::Focused {
                client_id: client.id.clone(),
            });
        }

        let opened = self.clients.open_window(&target).await?;
        info!(url = %target, opened = opened.is_some(), "Opened new window");
        Ok(ClickOutcome::Opened {
            client_id: opened.map(|c| c.id),
        })
    }

    /// `data.url` (absolute or origin-relative) or the configured default.
    /// A URL that does not parse falls back to the default.
    fn target_url(&self, data: &JsonValue) -> EngineResult<Url> {
        let default = self.config.notifications.click_url.as_str();
        let path = data
            .get("url")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(default);
        match self.config.resolve(path) {
            Ok(url) => Ok(url),
            Err(e) if path != default => {
                warn!(url = path, error = %e, "Invalid click URL, using default");
                self.config.resolve(default)
            }
            Err(e) => Err(e),
        }
    }
}
