//! Adaptive promotion of queued jobs into active processing.
//!
//! Each cycle looks at system load and admits a batch: nothing while either ceiling is hit,
//! a larger batch while load is low, the normal batch otherwise. Priority jobs go first and
//! both tiers are taken oldest first.
use std::{fmt, sync::Arc};

use serde::Serialize;
use slotgate_model::{GateSettings, JobKey, QueueTier};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::{ClockHandle, system_clock},
    error::CoreResult,
    metrics::{MetricsHandle, noop_metrics},
    queue::QueueHandle,
    runner::RunnerHandle,
    settings::SettingsProvider,
    store::StoreHandle,
};

/// Why a cycle admitted nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionSkip {
    InFlightCeiling,
    RunningCeiling,
    GlobalBackoff,
    RunnerUnavailable,
}

impl AdmissionSkip {
    pub fn as_label(&self) -> &'static str {
        match self {
            AdmissionSkip::InFlightCeiling => "in_flight_ceiling",
            AdmissionSkip::RunningCeiling => "running_ceiling",
            AdmissionSkip::GlobalBackoff => "global_backoff",
            AdmissionSkip::RunnerUnavailable => "runner_unavailable",
        }
    }
}

impl fmt::Display for AdmissionSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Batch chosen for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub size: u32,
    pub low_load: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub admitted: Vec<JobKey>,
    pub batch: Option<Batch>,
    pub skipped: Option<AdmissionSkip>,
    pub in_flight: u64,
    pub running: Option<u64>,
    /// Queued jobs passed over because their retries are exhausted.
    pub exhausted: u64,
}

/// Batch size for the given load, or the reason to admit nothing.
pub fn plan_batch(settings: &GateSettings, in_flight: u64, running: u64) -> Result<Batch, AdmissionSkip> {
    if in_flight >= settings.queue_max_in_flight_for_admission {
        return Err(AdmissionSkip::InFlightCeiling);
    }
    if running >= settings.queue_max_running_executions {
        return Err(AdmissionSkip::RunningCeiling);
    }
    let low_load = running < settings.low_load_running_threshold
        && in_flight < settings.low_load_in_flight_threshold;
    let size = if low_load {
        settings.queue_batch_size_low_load
    } else {
        settings.queue_batch_size
    };
    Ok(Batch { size, low_load })
}

pub struct QueueAdmission {
    store: StoreHandle,
    queue: QueueHandle,
    runner: RunnerHandle,
    settings: Arc<SettingsProvider>,
    clock: ClockHandle,
    metrics: MetricsHandle,
}

impl QueueAdmission {
    pub fn new(
        store: StoreHandle,
        queue: QueueHandle,
        runner: RunnerHandle,
        settings: Arc<SettingsProvider>,
    ) -> Self {
        Self {
            store,
            queue,
            runner,
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

    #[instrument(level = "debug", skip(self))]
    pub async fn run_once(&self) -> CoreResult<AdmissionReport> {
        let settings = self.settings.current().await?;
        let in_flight = self.store.in_flight().await?.value;
        let mut report = AdmissionReport {
            in_flight,
            ..AdmissionReport::default()
        };

        let running = match self.runner.running_jobs().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "running job count unavailable, skipping admission");
                return Ok(self.skip(report, AdmissionSkip::RunnerUnavailable));
            }
        };
        report.running = Some(running);

        let batch = match plan_batch(&settings, in_flight, running) {
            Ok(batch) => batch,
            Err(reason) => return Ok(self.skip(report, reason)),
        };
        if let Some(backoff) = self.store.global_backoff().await? {
            if backoff.is_active(self.clock.now()) {
                return Ok(self.skip(report, AdmissionSkip::GlobalBackoff));
            }
        }
        report.batch = Some(batch);

        let limit = batch.size as usize;
        'tiers: for tier in QueueTier::DRAIN_ORDER {
            if report.admitted.len() >= limit {
                break;
            }
            for key in self.queue.queued(tier).await? {
                if report.admitted.len() >= limit {
                    break 'tiers;
                }
                let meta = self.queue.retry_metadata(&key).await?;
                if !meta.is_admissible() {
                    warn!(job = %key, retry_count = meta.retry_count, "retries exhausted, not admitting");
                    report.exhausted += 1;
                    continue;
                }
                match self.queue.admit(&key).await {
                    Ok(true) => {
                        debug!(job = %key, tier = %tier, "job admitted");
                        report.admitted.push(key);
                    }
                    Ok(false) => debug!(job = %key, "job already moved"),
                    Err(e) => warn!(job = %key, error = %e, "admission move failed"),
                }
            }
        }

        self.metrics
            .record_admission(report.admitted.len() as u64, None);
        info!(
            admitted = report.admitted.len(),
            batch = batch.size,
            low_load = batch.low_load,
            in_flight,
            running,
            "admission cycle complete"
        );
        Ok(report)
    }

    fn skip(&self, mut report: AdmissionReport, reason: AdmissionSkip) -> AdmissionReport {
        info!(reason = %reason, in_flight = report.in_flight, running = ?report.running, "admission skipped");
        self.metrics.record_admission(0, Some(reason.as_label()));
        report.skipped = Some(reason);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        queue::{JobQueue, MemoryJobQueue},
        runner::StaticRunner,
        store::{MemorySlotStore, SlotStore},
    };
    use slotgate_model::{JobState, RetryMetadata};
    use time::OffsetDateTime;

    struct Fixture {
        admission: QueueAdmission,
        store: Arc<MemorySlotStore>,
        queue: Arc<MemoryJobQueue>,
        runner: Arc<StaticRunner>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySlotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let runner = Arc::new(StaticRunner::new(0));
        let admission = QueueAdmission::new(
            store.clone(),
            queue.clone(),
            runner.clone(),
            SettingsProvider::fixed(GateSettings::default()),
        );
        Fixture {
            admission,
            store,
            queue,
            runner,
        }
    }

    fn key(s: &str) -> JobKey {
        JobKey::new(s).unwrap()
    }

    async fn set_in_flight(store: &MemorySlotStore, value: u64) {
        let current = store.in_flight().await.unwrap().value;
        store
            .compare_and_set_in_flight(current, value, OffsetDateTime::now_utc())
            .await
            .unwrap();
    }

    #[test]
    fn plan_batch_rules() {
        let s = GateSettings::default();
        assert_eq!(plan_batch(&s, 10, 0), Err(AdmissionSkip::InFlightCeiling));
        assert_eq!(plan_batch(&s, 0, 50), Err(AdmissionSkip::RunningCeiling));
        assert_eq!(plan_batch(&s, 2, 9), Ok(Batch { size: 10, low_load: true }));
        assert_eq!(plan_batch(&s, 3, 9), Ok(Batch { size: 5, low_load: false }));
        assert_eq!(plan_batch(&s, 0, 10), Ok(Batch { size: 5, low_load: false }));
        assert_eq!(plan_batch(&s, 9, 49), Ok(Batch { size: 5, low_load: false }));
    }

    #[tokio::test]
    async fn admits_min_of_batch_and_queued() {
        for (queued, in_flight, running, expected) in [
            (3, 0, 0, 3),
            (25, 0, 0, 10),
            (25, 5, 0, 5),
            (25, 0, 20, 5),
            (4, 5, 20, 4),
            (25, 10, 0, 0),
            (25, 0, 50, 0),
            (25, 12, 60, 0),
        ] {
            let fx = fixture();
            for i in 0..queued {
                fx.queue
                    .enqueue(&key(&format!("job-{i:03}.pdf")), QueueTier::Standard)
                    .await
                    .unwrap();
            }
            set_in_flight(&fx.store, in_flight).await;
            fx.runner.set_running(running);

            let report = fx.admission.run_once().await.unwrap();
            assert_eq!(
                report.admitted.len(),
                expected,
                "queued={queued} in_flight={in_flight} running={running}"
            );
            assert_eq!(fx.queue.counts().await.unwrap().active, expected as u64);
        }
    }

    #[tokio::test]
    async fn priority_tier_drains_first_oldest_first() {
        let fx = fixture();
        for i in 0..8 {
            fx.queue
                .enqueue(&key(&format!("std-{i}.pdf")), QueueTier::Standard)
                .await
                .unwrap();
        }
        for i in 0..3 {
            fx.queue
                .enqueue(&key(&format!("pri-{i}.pdf")), QueueTier::Priority)
                .await
                .unwrap();
        }
        set_in_flight(&fx.store, 5).await;

        let report = fx.admission.run_once().await.unwrap();
        assert_eq!(
            report.admitted,
            vec![
                key("pri-0.pdf"),
                key("pri-1.pdf"),
                key("pri-2.pdf"),
                key("std-0.pdf"),
                key("std-1.pdf"),
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_jobs_are_never_admitted() {
        let fx = fixture();
        let bad = key("bad.pdf");
        fx.queue.enqueue(&bad, QueueTier::Standard).await.unwrap();
        fx.queue.admit(&bad).await.unwrap();
        fx.queue
            .requeue(
                &bad,
                QueueTier::Priority,
                RetryMetadata {
                    retry_count: 3,
                    max_retries_exceeded: true,
                },
            )
            .await
            .unwrap();
        fx.queue.enqueue(&key("ok.pdf"), QueueTier::Standard).await.unwrap();

        for _ in 0..5 {
            fx.admission.run_once().await.unwrap();
        }
        assert_eq!(
            fx.queue.state(&bad).await.unwrap(),
            Some(JobState::Queued(QueueTier::Priority))
        );
        assert_eq!(
            fx.queue.state(&key("ok.pdf")).await.unwrap(),
            Some(JobState::Active)
        );
    }

    #[tokio::test]
    async fn second_cycle_does_not_recount_admitted_jobs() {
        let fx = fixture();
        for i in 0..3 {
            fx.queue
                .enqueue(&key(&format!("j{i}.pdf")), QueueTier::Standard)
                .await
                .unwrap();
        }
        assert_eq!(fx.admission.run_once().await.unwrap().admitted.len(), 3);
        assert!(fx.admission.run_once().await.unwrap().admitted.is_empty());
    }

    #[tokio::test]
    async fn global_backoff_pauses_admission() {
        let fx = fixture();
        fx.queue.enqueue(&key("a.pdf"), QueueTier::Standard).await.unwrap();
        fx.store
            .extend_global_backoff(OffsetDateTime::now_utc().unix_timestamp() + 600)
            .await
            .unwrap();

        let report = fx.admission.run_once().await.unwrap();
        assert_eq!(report.skipped, Some(AdmissionSkip::GlobalBackoff));
        assert!(report.admitted.is_empty());
    }

    #[tokio::test]
    async fn unknown_running_count_pauses_admission() {
        let fx = fixture();
        fx.queue.enqueue(&key("a.pdf"), QueueTier::Standard).await.unwrap();
        fx.runner.set_failing(true);

        let report = fx.admission.run_once().await.unwrap();
        assert_eq!(report.skipped, Some(AdmissionSkip::RunnerUnavailable));
        assert_eq!(report.running, None);
        assert!(report.admitted.is_empty());
    }
}
