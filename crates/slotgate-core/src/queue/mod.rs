//! Job queue seen by admission and retry routing.
//!
//! The storage layout behind a queue is not part of the gate's contract; the gate only needs
//! tiered oldest-first listing, idempotent moves keyed by [`JobKey`] and retry metadata.
mod error;
pub use error::{QueueError, QueueResult};

mod memory;
pub use memory::MemoryJobQueue;

mod fs;
pub use fs::FsJobQueue;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use slotgate_model::{FailureRecord, JobKey, JobState, QueueTier, RetryMetadata};

/// Number of jobs per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub priority: u64,
    pub standard: u64,
    pub active: u64,
    pub succeeded: u64,
    pub dead_lettered: u64,
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Put a new job on `tier`. Enqueueing a job that already exists is a no-op.
    async fn enqueue(&self, key: &JobKey, tier: QueueTier) -> QueueResult<()>;

    /// Queued jobs of `tier`, oldest first.
    async fn queued(&self, tier: QueueTier) -> QueueResult<Vec<JobKey>>;

    async fn state(&self, key: &JobKey) -> QueueResult<Option<JobState>>;

    /// Retry metadata; a job without any reads as the default.
    async fn retry_metadata(&self, key: &JobKey) -> QueueResult<RetryMetadata>;

    /// Move a queued job to active.
    ///
    /// Returns `false` when the job is no longer queued (already admitted or gone).
    async fn admit(&self, key: &JobKey) -> QueueResult<bool>;

    /// Store `meta` and move the job to the back of `tier`.
    async fn requeue(&self, key: &JobKey, tier: QueueTier, meta: RetryMetadata) -> QueueResult<()>;

    /// Store `meta` and move the job to the dead-letter area. Dead-lettered jobs are kept.
    async fn dead_letter(&self, key: &JobKey, meta: RetryMetadata) -> QueueResult<()>;

    /// Move an active job to succeeded.
    async fn complete(&self, key: &JobKey) -> QueueResult<()>;

    /// Remove job-scoped scratch data. Missing scratch data is not an error.
    async fn purge_scratch(&self, key: &JobKey) -> QueueResult<()>;

    async fn record_failure(&self, record: &FailureRecord) -> QueueResult<()>;

    /// Failure records not yet drained, oldest first.
    async fn failures(&self) -> QueueResult<Vec<FailureRecord>>;

    /// Return and forget all pending failure records.
    async fn drain_failures(&self) -> QueueResult<Vec<FailureRecord>>;

    async fn counts(&self) -> QueueResult<QueueCounts>;
}

/// Shared handle to a queue backend.
pub type QueueHandle = Arc<dyn JobQueue>;
