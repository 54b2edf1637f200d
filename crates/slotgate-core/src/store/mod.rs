//! Shared state store for counters and tracking records.
//!
//! Every operation touches a single record and is atomic on its own; correctness across
//! processes relies on the conditional variants, never on read-then-write sequences.
mod error;
pub use error::{StoreError, StoreResult};

mod memory;
pub use memory::MemorySlotStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use slotgate_model::{
    GlobalBackoff, InFlightCounter, InFlightJobRecord, JobToken, MinuteKey, RpmWindow,
};
use time::OffsetDateTime;

/// Result of marking a job record released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReleased {
    /// Record flipped from unreleased to released.
    Released,
    /// Record was already released; nothing changed.
    AlreadyReleased,
    /// No such record (expired or cleared).
    Missing,
}

/// Records removed by [`SlotStore::clear_tracking`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingCleared {
    pub jobs: u64,
    pub windows: u64,
}

#[async_trait]
pub trait SlotStore: Send + Sync + 'static {
    /// Current in-flight counter; a missing record reads as zero.
    async fn in_flight(&self) -> StoreResult<InFlightCounter>;

    /// Increment the counter only if it is below `max`.
    ///
    /// Returns the new value, or `None` when the counter is full.
    async fn try_increment_in_flight(&self, max: u64, now: OffsetDateTime) -> StoreResult<Option<u64>>;

    /// Decrement the counter only if it is positive.
    ///
    /// Returns the new value, or `None` when the counter is already zero.
    async fn try_decrement_in_flight(&self, now: OffsetDateTime) -> StoreResult<Option<u64>>;

    /// Set the counter to `new` only if it still equals `expected`.
    async fn compare_and_set_in_flight(
        &self,
        expected: u64,
        new: u64,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    /// Unconditionally zero the counter; returns the previous value.
    async fn reset_in_flight(&self, now: OffsetDateTime) -> StoreResult<u64>;

    async fn rpm_window(&self, key: &MinuteKey) -> StoreResult<Option<RpmWindow>>;

    /// Increment the window for `key` only if its count is below `max`, creating it on first use.
    ///
    /// Returns the new count, or `None` when the window is full.
    async fn try_increment_rpm(
        &self,
        key: &MinuteKey,
        max: u64,
        expires_at: i64,
    ) -> StoreResult<Option<u64>>;

    async fn put_job(&self, record: &InFlightJobRecord) -> StoreResult<()>;

    async fn job(&self, token: &JobToken) -> StoreResult<Option<InFlightJobRecord>>;

    /// Atomically flip `released` to true.
    async fn mark_released(&self, token: &JobToken) -> StoreResult<MarkReleased>;

    /// Every unexpired job record, released or not.
    async fn jobs(&self) -> StoreResult<Vec<InFlightJobRecord>>;

    /// Delete every job record and every RPM window.
    async fn clear_tracking(&self) -> StoreResult<TrackingCleared>;

    async fn global_backoff(&self) -> StoreResult<Option<GlobalBackoff>>;

    /// Raise `backoff_until` to `until` unless it is already later; returns the stored record.
    async fn extend_global_backoff(&self, until: i64) -> StoreResult<GlobalBackoff>;

    /// Remove the backoff record; returns whether one existed.
    async fn clear_global_backoff(&self) -> StoreResult<bool>;
}

/// Shared handle to a store backend.
pub type StoreHandle = Arc<dyn SlotStore>;
