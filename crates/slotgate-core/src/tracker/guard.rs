use std::fmt;

use slotgate_model::JobToken;
use tracing::{error, warn};

use super::{SlotTracker, TrackerResult};

/// Proof of one acquired slot.
///
/// Call [`SlotGuard::release`] when the external call is done. Dropping an unreleased guard
/// schedules the release on the current tokio runtime; outside a runtime the slot leaks until
/// the reconciler repairs it.
#[must_use = "dropping the guard releases the slot"]
pub struct SlotGuard {
    tracker: SlotTracker,
    token: JobToken,
    api_type: String,
    released: bool,
}

impl SlotGuard {
    pub(super) fn new(tracker: SlotTracker, token: JobToken, api_type: String) -> Self {
        Self {
            tracker,
            token,
            api_type,
            released: false,
        }
    }

    pub fn token(&self) -> JobToken {
        self.token
    }

    pub fn api_type(&self) -> &str {
        &self.api_type
    }

    pub async fn release(mut self) -> TrackerResult<()> {
        self.released = true;
        self.tracker.release(&self.token).await
    }
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("token", &format_args!("{}", self.token))
            .field("api_type", &self.api_type)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let tracker = self.tracker.clone();
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tracker.release(&token).await {
                        error!(token = %token, error = %e, "release of dropped slot guard failed");
                    }
                });
            }
            Err(_) => {
                warn!(token = %token, api_type = %self.api_type, "slot guard dropped outside a runtime; slot left for reconciliation");
            }
        }
    }
}

/// In-flight increment that has no tracking record yet.
///
/// Dropped while still armed (the acquiring future was cancelled), it gives the slot back.
pub(super) struct PendingSlot {
    tracker: SlotTracker,
    armed: bool,
}

impl PendingSlot {
    pub(super) fn new(tracker: SlotTracker) -> Self {
        Self { tracker, armed: true }
    }

    /// The tracking record is written; hand the slot over to a guard.
    pub(super) fn into_guard(mut self, token: JobToken, api_type: String) -> SlotGuard {
        self.armed = false;
        SlotGuard::new(self.tracker.clone(), token, api_type)
    }

    /// Give the slot back now.
    pub(super) async fn roll_back(mut self) {
        self.armed = false;
        let now = self.tracker.clock.now();
        if let Err(e) = self.tracker.store.try_decrement_in_flight(now).await {
            error!(error = %e, "slot rollback failed");
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.tracker.store.clone();
        let now = self.tracker.clock.now();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.try_decrement_in_flight(now).await {
                        error!(error = %e, "rollback of cancelled acquire failed");
                    }
                });
            }
            Err(_) => {
                warn!("acquire cancelled outside a runtime; slot left for reconciliation");
            }
        }
    }
}
