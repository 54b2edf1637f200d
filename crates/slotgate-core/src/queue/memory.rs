use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use slotgate_model::{FailureRecord, JobKey, JobState, QueueTier, RetryMetadata};

use super::{JobQueue, QueueCounts, QueueError, QueueResult};
use crate::runner::{JobRunner, RunnerError};

struct Entry {
    state: JobState,
    meta: RetryMetadata,
    /// Enqueue order; refreshed on every requeue.
    seq: u64,
    scratch: bool,
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<JobKey, Entry>,
    next_seq: u64,
    failures: Vec<FailureRecord>,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn entry(&mut self, key: &JobKey) -> QueueResult<&mut Entry> {
        self.jobs
            .get_mut(key)
            .ok_or_else(|| QueueError::NotFound(key.clone()))
    }
}

/// Process-local queue. Also answers running-job queries by counting active jobs.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> QueueResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Backend("memory queue mutex poisoned".into()))
    }

    /// Attach scratch data to a job, as a running worker would.
    pub fn put_scratch(&self, key: &JobKey) -> QueueResult<()> {
        self.inner()?.entry(key)?.scratch = true;
        Ok(())
    }

    pub fn has_scratch(&self, key: &JobKey) -> QueueResult<bool> {
        Ok(self.inner()?.jobs.get(key).is_some_and(|e| e.scratch))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, key: &JobKey, tier: QueueTier) -> QueueResult<()> {
        let mut inner = self.inner()?;
        if inner.jobs.contains_key(key) {
            return Ok(());
        }
        let seq = inner.seq();
        inner.jobs.insert(
            key.clone(),
            Entry {
                state: JobState::Queued(tier),
                meta: RetryMetadata::default(),
                seq,
                scratch: false,
            },
        );
        Ok(())
    }

    async fn queued(&self, tier: QueueTier) -> QueueResult<Vec<JobKey>> {
        let inner = self.inner()?;
        let mut keys: Vec<_> = inner
            .jobs
            .iter()
            .filter(|(_, e)| e.state == JobState::Queued(tier))
            .map(|(k, e)| (e.seq, k.clone()))
            .collect();
        keys.sort();
        Ok(keys.into_iter().map(|(_, k)| k).collect())
    }

    async fn state(&self, key: &JobKey) -> QueueResult<Option<JobState>> {
        Ok(self.inner()?.jobs.get(key).map(|e| e.state))
    }

    async fn retry_metadata(&self, key: &JobKey) -> QueueResult<RetryMetadata> {
        Ok(self
            .inner()?
            .jobs
            .get(key)
            .map(|e| e.meta)
            .unwrap_or_default())
    }

    async fn admit(&self, key: &JobKey) -> QueueResult<bool> {
        let mut inner = self.inner()?;
        match inner.jobs.get_mut(key) {
            Some(e) if matches!(e.state, JobState::Queued(_)) => {
                e.state = JobState::Active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, key: &JobKey, tier: QueueTier, meta: RetryMetadata) -> QueueResult<()> {
        let mut inner = self.inner()?;
        let seq = inner.seq();
        let e = inner.entry(key)?;
        e.meta = meta;
        e.state = JobState::Queued(tier);
        e.seq = seq;
        Ok(())
    }

    async fn dead_letter(&self, key: &JobKey, meta: RetryMetadata) -> QueueResult<()> {
        let mut inner = self.inner()?;
        let e = inner.entry(key)?;
        e.meta = meta;
        e.state = JobState::DeadLettered;
        Ok(())
    }

    async fn complete(&self, key: &JobKey) -> QueueResult<()> {
        self.inner()?.entry(key)?.state = JobState::Succeeded;
        Ok(())
    }

    async fn purge_scratch(&self, key: &JobKey) -> QueueResult<()> {
        if let Some(e) = self.inner()?.jobs.get_mut(key) {
            e.scratch = false;
        }
        Ok(())
    }

    async fn record_failure(&self, record: &FailureRecord) -> QueueResult<()> {
        self.inner()?.failures.push(record.clone());
        Ok(())
    }

    async fn failures(&self) -> QueueResult<Vec<FailureRecord>> {
        Ok(self.inner()?.failures.clone())
    }

    async fn drain_failures(&self) -> QueueResult<Vec<FailureRecord>> {
        Ok(std::mem::take(&mut self.inner()?.failures))
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let inner = self.inner()?;
        let mut counts = QueueCounts::default();
        for e in inner.jobs.values() {
            match e.state {
                JobState::Queued(QueueTier::Priority) => counts.priority += 1,
                JobState::Queued(QueueTier::Standard) => counts.standard += 1,
                JobState::Active => counts.active += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::DeadLettered => counts.dead_lettered += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl JobRunner for MemoryJobQueue {
    async fn running_jobs(&self) -> Result<u64, RunnerError> {
        self.counts()
            .await
            .map(|c| c.active)
            .map_err(|e| RunnerError::Query(e.to_string()))
    }
}
