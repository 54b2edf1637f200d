//! Reconciler and admission cycles as periodic supervisor tasks.
use std::{sync::Arc, time::Duration};

use slotgate_core::{admission::QueueAdmission, reconciler::Reconciler};
use slotgate_model::{BackoffStrategy, JitterStrategy};
use taskvisor::{
    BackoffPolicy, ControllerSpec, JitterPolicy, RestartPolicy, TaskError, TaskFn, TaskRef,
    TaskSpec,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const RECONCILE_TASK: &str = "slotgate-reconcile";
pub const ADMISSION_TASK: &str = "slotgate-admission";

/// Hard ceiling on one cycle.
const CYCLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry schedule after a failed cycle; successful cycles wait the full interval.
fn cycle_retry() -> BackoffStrategy {
    BackoffStrategy {
        jitter: JitterStrategy::Equal,
        first_ms: 1_000,
        max_ms: 60_000,
        factor: 2.0,
    }
}

pub fn to_jitter_policy(s: JitterStrategy) -> JitterPolicy {
    match s {
        JitterStrategy::Decorrelated => JitterPolicy::Decorrelated,
        JitterStrategy::Equal => JitterPolicy::Equal,
        JitterStrategy::Full => JitterPolicy::Full,
        JitterStrategy::None => JitterPolicy::None,
    }
}

/// Run `task` forever, `interval` apart after each success.
pub fn periodic_spec(task: TaskRef, interval: Duration) -> ControllerSpec {
    let retry = cycle_retry();
    let backoff = BackoffPolicy {
        first: retry.first(),
        max: retry.max(),
        jitter: to_jitter_policy(retry.jitter),
        factor: retry.factor,
    };
    ControllerSpec::replace(TaskSpec::new(
        task,
        RestartPolicy::Always {
            interval: Some(interval),
        },
        backoff,
        Some(CYCLE_TIMEOUT),
    ))
}

pub fn reconcile_task(reconciler: Arc<Reconciler>) -> TaskRef {
    TaskFn::arc(RECONCILE_TASK, move |ctx: CancellationToken| {
        let reconciler = Arc::clone(&reconciler);
        async move {
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            reconcile_cycle(&reconciler).await
        }
    })
}

pub fn admission_task(admission: Arc<QueueAdmission>) -> TaskRef {
    TaskFn::arc(ADMISSION_TASK, move |ctx: CancellationToken| {
        let admission = Arc::clone(&admission);
        async move {
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            admission_cycle(&admission).await
        }
    })
}

pub async fn reconcile_cycle(reconciler: &Reconciler) -> Result<(), TaskError> {
    let report = reconciler.run_once().await.map_err(|e| TaskError::Fail {
        reason: format!("reconcile cycle failed: {e}"),
    })?;
    debug!(action = report.action.as_label(), "reconcile task done");
    Ok(())
}

pub async fn admission_cycle(admission: &QueueAdmission) -> Result<(), TaskError> {
    let report = admission.run_once().await.map_err(|e| TaskError::Fail {
        reason: format!("admission cycle failed: {e}"),
    })?;
    debug!(admitted = report.admitted.len(), "admission task done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgate_core::{
        queue::{JobQueue, MemoryJobQueue},
        runner::StaticRunner,
        settings::SettingsProvider,
        store::{MemorySlotStore, SlotStore},
    };
    use slotgate_model::{GateSettings, JobKey, JobState, QueueTier};
    use time::OffsetDateTime;

    #[test]
    fn jitter_maps_one_to_one() {
        assert!(matches!(to_jitter_policy(JitterStrategy::None), JitterPolicy::None));
        assert!(matches!(to_jitter_policy(JitterStrategy::Full), JitterPolicy::Full));
        assert!(matches!(to_jitter_policy(JitterStrategy::Equal), JitterPolicy::Equal));
        assert!(matches!(
            to_jitter_policy(JitterStrategy::Decorrelated),
            JitterPolicy::Decorrelated
        ));
    }

    #[test]
    fn retry_schedule_is_bounded() {
        let retry = cycle_retry();
        assert!(retry.first() <= retry.max());
        assert!(retry.max() <= CYCLE_TIMEOUT);
    }

    #[tokio::test]
    async fn reconcile_cycle_repairs_a_stuck_counter() {
        let store = Arc::new(MemorySlotStore::new());
        let now = OffsetDateTime::now_utc();
        for _ in 0..4 {
            store.try_increment_in_flight(150, now).await.unwrap();
        }
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(StaticRunner::new(0)),
            SettingsProvider::fixed(GateSettings::default()),
        );

        reconcile_cycle(&reconciler).await.unwrap();
        assert_eq!(store.in_flight().await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn admission_cycle_promotes_queued_jobs() {
        let queue = Arc::new(MemoryJobQueue::new());
        let key = JobKey::new("acme/a.pdf").unwrap();
        queue.enqueue(&key, QueueTier::Standard).await.unwrap();
        let admission = QueueAdmission::new(
            Arc::new(MemorySlotStore::new()),
            queue.clone(),
            Arc::new(StaticRunner::new(0)),
            SettingsProvider::fixed(GateSettings::default()),
        );

        admission_cycle(&admission).await.unwrap();
        assert_eq!(queue.state(&key).await.unwrap(), Some(JobState::Active));
    }
}
