//! Taskvisor event logging for the periodic reconcile and admission cycles.
use async_trait::async_trait;
use taskvisor::{Event, EventKind, Subscribe};
use tracing::{debug, error, info, trace, warn};

const QUEUE_CAPACITY: usize = 1024;

/// Logs supervisor events with the task name and attempt as structured fields.
///
/// Cycles succeed silently apart from their own logs; failures, timeouts and
/// terminated actors surface at warn/error.
#[derive(Debug, Default)]
pub struct CycleEventLogger;

#[async_trait]
impl Subscribe for CycleEventLogger {
    async fn on_event(&self, event: &Event) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "cycle-event-logger"
    }

    fn queue_capacity(&self) -> usize {
        QUEUE_CAPACITY
    }
}

fn log_event(e: &Event) {
    let task = e.task.as_deref().unwrap_or("unknown");
    let reason = e.reason.as_deref().unwrap_or("");
    let attempt = e.attempt.unwrap_or(0);

    match e.kind {
        EventKind::TaskStarting => debug!(task, attempt, "cycle starting"),
        EventKind::TaskStopped => trace!(task, "cycle finished"),
        EventKind::TaskFailed => warn!(task, attempt, reason, "cycle failed"),
        EventKind::TimeoutHit => warn!(
            task,
            timeout_ms = e.timeout_ms.unwrap_or(0),
            "cycle exceeded its timeout"
        ),
        EventKind::BackoffScheduled if e.reason.is_some() => debug!(
            task,
            attempt,
            delay_ms = e.delay_ms.unwrap_or(0),
            reason,
            "cycle retry scheduled"
        ),
        EventKind::BackoffScheduled => trace!(
            task,
            delay_ms = e.delay_ms.unwrap_or(0),
            "next cycle scheduled"
        ),
        EventKind::TaskAdded => info!(task, "periodic task registered"),
        EventKind::ActorExhausted | EventKind::ActorDead => {
            error!(task, reason, "periodic task stopped permanently")
        }
        EventKind::ControllerRejected => warn!(task, reason, "task submission rejected"),
        EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
            error!(task, reason, "event subscriber lost events")
        }
        EventKind::ShutdownRequested => info!("shutdown requested"),
        EventKind::AllStoppedWithinGrace => info!("all cycles stopped within grace"),
        EventKind::GraceExceeded => warn!("grace exceeded; some cycles did not stop in time"),
        _ => trace!(task, reason, "supervisor event"),
    }
}
