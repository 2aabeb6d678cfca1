//! In-process host.
//!
//! Implements every host capability over plain state so the engine can run
//! headless: page clients with inboxes, a notification tray, and a
//! registration that follows `skip_waiting`.

use async_trait::async_trait;
use hashbrown::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;

use crate::clients::{Client, ClientMatchOptions, ClientType, ClientsApi, Lifecycle, Notifier};
use crate::lifecycle::Registration;
use crate::notification::Notification;
use crate::protocol::ControlMessage;
use crate::{EngineError, EngineResult};

#[derive(Debug, Default)]
struct HostState {
    clients: Vec<Client>,
    next_client: u64,
    unreachable: HashSet<String>,
    inbox: Vec<(String, ControlMessage)>,
    navigations: Vec<(String, Url)>,
    opened: Vec<Url>,
    shown: Vec<Notification>,
    closed: Vec<String>,
    claims: usize,
    registration: Registration,
}

/// Headless host recording everything the engine asks of it.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an uncontrolled window at `url`.
    pub fn open_page(&self, url: Url) -> Client {
        let mut state = self.state();
        state.next_client += 1;
        let client = Client {
            id: format!("client-{}", state.next_client),
            url,
            client_type: ClientType::Window,
            controlled: false,
            focused: false,
        };
        state.clients.push(client.clone());
        client
    }

    /// Close a window.
    pub fn close_page(&self, client_id: &str) -> Option<Client> {
        let mut state = self.state();
        let index = state.clients.iter().position(|c| c.id == client_id)?;
        Some(state.clients.remove(index))
    }

    /// Make posts to a client fail.
    pub fn set_unreachable(&self, client_id: &str) {
        self.state().unreachable.insert(client_id.to_string());
    }

    pub fn clients(&self) -> Vec<Client> {
        self.state().clients.clone()
    }

    /// Messages delivered to one client, in order.
    pub fn messages_for(&self, client_id: &str) -> Vec<ControlMessage> {
        self.state()
            .inbox
            .iter()
            .filter(|(id, _)| id == client_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Every delivered message with its recipient.
    pub fn messages(&self) -> Vec<(String, ControlMessage)> {
        self.state().inbox.clone()
    }

    pub fn navigations(&self) -> Vec<(String, Url)> {
        self.state().navigations.clone()
    }

    pub fn opened_windows(&self) -> Vec<Url> {
        self.state().opened.clone()
    }

    pub fn shown_notifications(&self) -> Vec<Notification> {
        self.state().shown.clone()
    }

    pub fn closed_tags(&self) -> Vec<String> {
        self.state().closed.clone()
    }

    pub fn claim_count(&self) -> usize {
        self.state().claims
    }

    /// Run `f` against the registration.
    pub fn with_registration<T>(&self, f: impl FnOnce(&mut Registration) -> T) -> T {
        f(&mut self.state().registration)
    }
}

#[async_trait]
impl ClientsApi for MemoryHost {
    async fn match_all(&self, options: ClientMatchOptions) -> EngineResult<Vec<Client>> {
        Ok(self
            .state()
            .clients
            .iter()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| options.client_type.matches(c.client_type))
            .cloned()
            .collect())
    }

    async fn post_message(&self, client_id: &str, message: &ControlMessage) -> EngineResult<()> {
        let mut state = self.state();
        if state.unreachable.contains(client_id) {
            return Err(EngineError::client(format!("{client_id} is unreachable")));
        }
        if !state.clients.iter().any(|c| c.id == client_id) {
            return Err(EngineError::client(format!("no client {client_id}")));
        }
        debug!(client = client_id, kind = message.kind(), "Posted message");
        state.inbox.push((client_id.to_string(), message.clone()));
        Ok(())
    }

    async fn navigate(&self, client_id: &str, url: &Url) -> EngineResult<()> {
        let mut state = self.state();
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| EngineError::client(format!("no client {client_id}")))?;
        if client.client_type != ClientType::Window {
            return Err(EngineError::client("Can only navigate window clients"));
        }
        client.url = url.clone();
        state.navigations.push((client_id.to_string(), url.clone()));
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> EngineResult<()> {
        let mut state = self.state();
        if !state.clients.iter().any(|c| c.id == client_id) {
            return Err(EngineError::client(format!("no client {client_id}")));
        }
        for client in state.clients.iter_mut() {
            client.focused = client.id == client_id;
        }
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> EngineResult<Option<Client>> {
        self.state().opened.push(url.clone());
        let mut client = self.open_page(url.clone());
        client.focused = true;
        let mut state = self.state();
        for existing in state.clients.iter_mut() {
            existing.focused = existing.id == client.id;
        }
        Ok(Some(client))
    }

    async fn claim(&self) -> EngineResult<()> {
        let mut state = self.state();
        for client in state.clients.iter_mut() {
            client.controlled = true;
        }
        state.claims += 1;
        state.registration.activate_complete();
        Ok(())
    }
}

#[async_trait]
impl Notifier for MemoryHost {
    async fn show(&self, notification: &Notification) -> EngineResult<()> {
        self.state().shown.push(notification.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> EngineResult<()> {
        let mut state = self.state();
        state.shown.retain(|n| n.options.tag != tag);
        state.closed.push(tag.to_string());
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for MemoryHost {
    async fn skip_waiting(&self) -> EngineResult<()> {
        self.state().registration.skip_waiting();
        Ok(())
    }
}
