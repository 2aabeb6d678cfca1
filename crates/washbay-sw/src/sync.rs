//! Drains the offline mutation queue to open pages.
//!
//! The worker never talks to the backend itself. Each drain posts every
//! pending mutation to every open window; a page commits it and answers
//! with `BOOKING_SYNCED`, which removes the mutation. Delivery is
//! at-least-once, so pages must dedupe on the idempotency key.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use washbay_store::{MutationId, MutationStore, PendingMutation};

use crate::clients::{Client, ClientMatchOptions, ClientsApi};
use crate::protocol::ControlMessage;
use crate::EngineResult;

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Mutations queued when the drain started.
    pub pending: usize,
    /// Open window clients.
    pub clients: usize,
    /// Successful posts.
    pub messages_sent: usize,
    /// Mutations moved to the dead-letter table.
    pub dead_lettered: usize,
}

/// Sync orchestrator over the durable queue.
pub struct SyncOrchestrator {
    mutations: Arc<dyn MutationStore>,
    clients: Arc<dyn ClientsApi>,
    max_delivery_attempts: Option<u32>,
}

impl SyncOrchestrator {
    pub fn new(
        mutations: Arc<dyn MutationStore>,
        clients: Arc<dyn ClientsApi>,
        max_delivery_attempts: Option<u32>,
    ) -> Self {
        Self {
            mutations,
            clients,
            max_delivery_attempts,
        }
    }

    /// Post every pending mutation to every open window.
    ///
    /// Nothing is removed here. With no windows open nothing is sent and
    /// no attempt is recorded.
    pub async fn drain(&self) -> EngineResult<DrainReport> {
        match self.try_drain().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, category = e.category(), "Sync drain failed");
                Err(e)
            }
        }
    }

    async fn try_drain(&self) -> EngineResult<DrainReport> {
        let pending = self.mutations.list_all().await?;
        let mut report = DrainReport {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            debug!("Nothing to sync");
            return Ok(report);
        }

        let windows = self
            .clients
            .match_all(ClientMatchOptions::all_windows())
            .await?;
        report.clients = windows.len();
        if windows.is_empty() {
            warn!(pending = report.pending, "No open windows; mutations stay queued");
            return Ok(report);
        }

        for mutation in pending {
            if self.exhausted(&mutation) {
                if self.mutations.dead_letter(mutation.id).await? {
                    warn!(
                        id = %mutation.id,
                        attempts = mutation.attempts,
                        "Mutation dead-lettered"
                    );
                    report.dead_lettered += 1;
                }
                continue;
            }

            let delivered = self.broadcast(&mutation, &windows).await;
            report.messages_sent += delivered;
            if delivered > 0 {
                self.mutations.record_attempt(mutation.id).await?;
            }
        }

        info!(
            pending = report.pending,
            clients = report.clients,
            sent = report.messages_sent,
            dead_lettered = report.dead_lettered,
            "Sync drain complete"
        );
        Ok(report)
    }

    fn exhausted(&self, mutation: &PendingMutation) -> bool {
        self.max_delivery_attempts
            .is_some_and(|max| mutation.attempts >= max)
    }

    /// Returns how many clients accepted the message.
    async fn broadcast(&self, mutation: &PendingMutation, windows: &[Client]) -> usize {
        let message = ControlMessage::SyncBooking {
            payload: mutation.payload.clone(),
            offline_id: mutation.id,
            idempotency_key: mutation.idempotency_key.clone(),
        };

        let mut delivered = 0;
        for client in windows {
            match self.clients.post_message(&client.id, &message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    id = %mutation.id,
                    client = %client.id,
                    error = %e,
                    "Failed to post mutation"
                ),
            }
        }
        delivered
    }

    /// Remove a mutation the page committed. Unknown ids are a no-op.
    pub async fn acknowledge(&self, id: MutationId) -> EngineResult<()> {
        self.mutations.remove(id).await?;
        debug!(id = %id, "Mutation acknowledged");
        Ok(())
    }

    /// Queue length.
    pub async fn pending_count(&self) -> EngineResult<usize> {
        Ok(self.mutations.count().await?)
    }
}
