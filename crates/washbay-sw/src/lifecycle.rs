//! Registration state machine for worker versions.
//!
//! Hosts use this to track which generation is installing, waiting or
//! active. The engine itself only ever asks to skip the waiting phase.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script parsed, nothing run yet.
    #[default]
    Parsed,
    /// Install event in flight.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event in flight.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One generation of the worker.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    /// Cache generation tag.
    pub version: String,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Installing, waiting and active slots of a registration.
#[derive(Debug, Default)]
pub struct Registration {
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
    skip_waiting: bool,
    /// Versions pushed out of a slot, oldest first.
    retired: Vec<WorkerVersion>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start installing a new version.
    pub fn update(&mut self, version: impl Into<String>) {
        let mut worker = WorkerVersion::new(version);
        worker.set_state(ServiceWorkerState::Installing);
        if let Some(previous) = self.installing.replace(worker) {
            self.retire(previous);
        }
        self.skip_waiting = false;
    }

    /// Install handler finished. Failed installs go redundant.
    pub fn install_complete(&mut self, succeeded: bool) {
        let Some(mut worker) = self.installing.take() else {
            return;
        };
        if !succeeded {
            self.retire(worker);
            return;
        }
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(previous) = self.waiting.replace(worker) {
            self.retire(previous);
        }
        if self.skip_waiting || self.active.is_none() {
            self.begin_activation();
        }
    }

    /// Skip waiting (force activate).
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
        self.begin_activation();
    }

    /// Promote the waiting version; it stays `Activating` until
    /// `activate_complete`.
    fn begin_activation(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(ServiceWorkerState::Activating);
            if let Some(old) = self.active.replace(worker) {
                self.retire(old);
            }
        }
    }

    /// Activate handler finished.
    pub fn activate_complete(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            if worker.state == ServiceWorkerState::Activating {
                worker.set_state(ServiceWorkerState::Activated);
            }
        }
    }

    /// Version in the active slot.
    pub fn active_version(&self) -> Option<&str> {
        self.active.as_ref().map(|w| w.version.as_str())
    }

    /// Versions that went redundant.
    pub fn retired(&self) -> &[WorkerVersion] {
        &self.retired
    }

    fn retire(&mut self, mut worker: WorkerVersion) {
        worker.set_state(ServiceWorkerState::Redundant);
        self.retired.push(worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_install_activates() {
        let mut reg = Registration::new();
        reg.update("v1");
        assert_eq!(
            reg.installing.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Installing)
        );

        reg.install_complete(true);
        assert_eq!(
            reg.active.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Activating)
        );

        reg.activate_complete();
        assert_eq!(reg.active_version(), Some("v1"));
        assert_eq!(
            reg.active.as_ref().map(|w| w.state),
            Some(ServiceWorkerState::Activated)
        );
    }

    #[test]
    fn test_update_waits_without_skip() {
        let mut reg = Registration::new();
        reg.update("v1");
        reg.install_complete(true);
        reg.activate_complete();

        reg.update("v2");
        reg.install_complete(true);
        assert_eq!(reg.active_version(), Some("v1"));
        assert_eq!(reg.waiting.as_ref().map(|w| w.version.as_str()), Some("v2"));
    }

    #[test]
    fn test_skip_waiting_replaces_active() {
        let mut reg = Registration::new();
        reg.update("v1");
        reg.install_complete(true);
        reg.activate_complete();

        reg.update("v2");
        reg.skip_waiting();
        reg.install_complete(true);
        reg.activate_complete();

        assert_eq!(reg.active_version(), Some("v2"));
        assert!(reg.waiting.is_none());
        assert_eq!(reg.retired().len(), 1);
        assert_eq!(reg.retired()[0].state, ServiceWorkerState::Redundant);
    }

    #[test]
    fn test_failed_install_is_redundant() {
        let mut reg = Registration::new();
        reg.update("v1");
        reg.install_complete(false);

        assert!(reg.active.is_none());
        assert_eq!(reg.retired()[0].version, "v1");
    }
}
