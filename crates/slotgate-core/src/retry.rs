//! Failure routing: retry on the standard tier or dead-letter.
use std::sync::Arc;

use serde::Serialize;
use slotgate_model::{FailureKind, FailureRecord, JobKey, QueueTier};
use tracing::{error, info, instrument, warn};

use crate::{
    clock::{ClockHandle, system_clock},
    error::CoreResult,
    metrics::{MetricsHandle, noop_metrics},
    queue::QueueHandle,
    settings::SettingsProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RetryOutcome {
    /// Back on the standard tier with the new count.
    Requeued { retry_count: u32 },
    /// Retries exhausted; kept in the dead-letter area.
    DeadLettered { retry_count: u32 },
}

impl RetryOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryOutcome::Requeued { .. } => "requeued",
            RetryOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}

pub struct RetryRouter {
    queue: QueueHandle,
    settings: Arc<SettingsProvider>,
    clock: ClockHandle,
    metrics: MetricsHandle,
}

impl RetryRouter {
    pub fn new(queue: QueueHandle, settings: Arc<SettingsProvider>) -> Self {
        Self {
            queue,
            settings,
            clock: system_clock(),
            metrics: noop_metrics(),
        }
    }

    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Route a failed, timed-out or aborted job.
    ///
    /// Scratch data is purged and a failure record appended on every path, including when
    /// the move itself fails; the move error is returned afterwards.
    #[instrument(level = "debug", skip(self, key, reason), fields(job = %key))]
    pub async fn on_failure(&self, key: &JobKey, kind: FailureKind, reason: &str) -> CoreResult<RetryOutcome> {
        let settings = self.settings.current().await?;

        let routed = self.route(key, settings.max_retries).await;

        if let Err(e) = self.queue.purge_scratch(key).await {
            warn!(error = %e, "scratch purge failed");
        }

        let (retry_count, exceeded) = match &routed {
            Ok(RetryOutcome::Requeued { retry_count }) => (*retry_count, false),
            Ok(RetryOutcome::DeadLettered { retry_count }) => (*retry_count, true),
            Err(_) => {
                let meta = self.queue.retry_metadata(key).await.unwrap_or_default();
                (meta.retry_count, meta.max_retries_exceeded)
            }
        };
        let record = FailureRecord {
            job_key: key.clone(),
            kind,
            reason: reason.to_string(),
            retry_count,
            max_retries_exceeded: exceeded,
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.queue.record_failure(&record).await {
            warn!(error = %e, "failure record not stored");
        }

        match &routed {
            Ok(RetryOutcome::Requeued { retry_count }) => {
                info!(retry_count, max_retries = settings.max_retries, reason, "job requeued");
            }
            Ok(RetryOutcome::DeadLettered { retry_count }) => {
                warn!(retry_count, max_retries = settings.max_retries, reason, "job dead-lettered");
            }
            Err(e) => error!(error = %e, "failed job could not be routed"),
        }
        if let Ok(outcome) = &routed {
            self.metrics.record_retry(outcome.as_label());
        }
        routed
    }

    async fn route(&self, key: &JobKey, max_retries: u32) -> CoreResult<RetryOutcome> {
        let current = self.queue.retry_metadata(key).await?;
        let next = current.after_failure(max_retries);
        if next.max_retries_exceeded {
            self.queue.dead_letter(key, next).await?;
            Ok(RetryOutcome::DeadLettered {
                retry_count: next.retry_count,
            })
        } else {
            self.queue.requeue(key, QueueTier::Standard, next).await?;
            Ok(RetryOutcome::Requeued {
                retry_count: next.retry_count,
            })
        }
    }

    /// Mark an active job succeeded and purge its scratch data.
    #[instrument(level = "debug", skip(self, key), fields(job = %key))]
    pub async fn on_success(&self, key: &JobKey) -> CoreResult<()> {
        let moved = self.queue.complete(key).await;
        if let Err(e) = self.queue.purge_scratch(key).await {
            warn!(error = %e, "scratch purge failed");
        }
        moved?;
        info!("job succeeded");
        Ok(())
    }
}
