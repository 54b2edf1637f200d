//! Drift repair for the in-flight counter.
//!
//! Crashed workers never release their slots, so the counter drifts above the number of calls
//! really in progress. Each cycle compares the counter against tracked records (and the job
//! runner, when reachable) and issues at most one compare-and-set reset. It never takes a lock
//! and never blocks workers; a cycle that loses a race to a worker simply skips its reset.
use std::sync::Arc;

use serde::Serialize;
use slotgate_model::{Diagnosis, JobToken};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::{ClockHandle, system_clock},
    error::CoreResult,
    metrics::{MetricsHandle, noop_metrics},
    runner::RunnerHandle,
    settings::SettingsProvider,
    store::{MarkReleased, StoreHandle},
};

/// What a reconciliation cycle did to the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ReconcileAction {
    /// Reconciliation is switched off.
    Disabled,
    /// Counter within tolerance.
    Unchanged,
    /// Counter moved from `from` to `to`.
    Reset { from: u64, to: u64 },
    /// A worker changed the counter between read and reset; retried next cycle.
    Raced { expected: u64 },
}

impl ReconcileAction {
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconcileAction::Disabled => "disabled",
            ReconcileAction::Unchanged => "unchanged",
            ReconcileAction::Reset { to: 0, .. } => "reset_zero",
            ReconcileAction::Reset { .. } => "reset_tracked",
            ReconcileAction::Raced { .. } => "raced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub action: ReconcileAction,
    pub counter: u64,
    pub tracked: u64,
    /// `None` when the runner could not be queried.
    pub running: Option<u64>,
    /// Stale records marked released.
    pub swept: u64,
}

/// Snapshot taken at the start of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub counter: u64,
    pub tracked: u64,
    pub running: Option<u64>,
}

/// Target counter value for an observation, if a reset is due.
///
/// A positive counter with nothing tracked or running goes to zero; otherwise an excess of
/// more than `max_drift` over tracked records goes back to the tracked count. An unknown
/// running count only consults tracked records.
pub fn plan(obs: &Observation, max_drift: u64) -> Option<u64> {
    let idle = obs.running.is_none_or(|r| r == 0);
    if obs.counter > 0 && obs.tracked == 0 && idle {
        return Some(0);
    }
    if obs.counter.saturating_sub(obs.tracked) > max_drift {
        return Some(obs.tracked);
    }
    None
}

pub struct Reconciler {
    store: StoreHandle,
    runner: RunnerHandle,
    settings: Arc<SettingsProvider>,
    clock: ClockHandle,
    metrics: MetricsHandle,
}

impl Reconciler {
    pub fn new(store: StoreHandle, runner: RunnerHandle, settings: Arc<SettingsProvider>) -> Self {
        Self {
            store,
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

    /// One full cycle: observe, reset if due, sweep stale records.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_once(&self) -> CoreResult<ReconcileReport> {
        let settings = self.settings.current().await?;
        if !settings.reconciler_enabled {
            debug!("reconciler disabled");
            self.metrics
                .record_reconcile(ReconcileAction::Disabled.as_label(), 0);
            return Ok(ReconcileReport {
                action: ReconcileAction::Disabled,
                counter: 0,
                tracked: 0,
                running: None,
                swept: 0,
            });
        }

        let obs = self.observe().await?;
        let action = self.apply(&obs, settings.reconciler_max_drift).await?;
        let swept = self.sweep_stale(settings.stale_job_age()).await?;

        self.metrics.record_reconcile(action.as_label(), swept);
        info!(
            action = action.as_label(),
            counter = obs.counter,
            tracked = obs.tracked,
            running = ?obs.running,
            swept,
            "reconcile cycle complete"
        );
        Ok(ReconcileReport {
            action,
            counter: obs.counter,
            tracked: obs.tracked,
            running: obs.running,
            swept,
        })
    }

    /// Read counter, tracked records and running jobs.
    pub async fn observe(&self) -> CoreResult<Observation> {
        let now = self.clock.now();
        let counter = self.store.in_flight().await?.value;
        let tracked = self
            .store
            .jobs()
            .await?
            .iter()
            .filter(|j| j.is_live(now))
            .count() as u64;
        let running = match self.runner.running_jobs().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "running job count unavailable, using tracked records only");
                None
            }
        };
        self.metrics.set_in_flight(counter);
        Ok(Observation {
            counter,
            tracked,
            running,
        })
    }

    /// Reset the counter if `obs` calls for it, as a single compare-and-set.
    pub async fn apply(&self, obs: &Observation, max_drift: u64) -> CoreResult<ReconcileAction> {
        let Some(target) = plan(obs, max_drift) else {
            return Ok(ReconcileAction::Unchanged);
        };

        let swapped = self
            .store
            .compare_and_set_in_flight(obs.counter, target, self.clock.now())
            .await?;
        if !swapped {
            info!(expected = obs.counter, "counter moved during reconciliation, reset skipped");
            return Ok(ReconcileAction::Raced {
                expected: obs.counter,
            });
        }

        warn!(from = obs.counter, to = target, tracked = obs.tracked, running = ?obs.running, "in-flight counter reset");
        self.metrics.set_in_flight(target);
        Ok(ReconcileAction::Reset {
            from: obs.counter,
            to: target,
        })
    }

    /// Mark released every unreleased record older than `max_age`.
    async fn sweep_stale(&self, max_age: time::Duration) -> CoreResult<u64> {
        let now = self.clock.now();
        let mut swept = 0;
        for record in self.store.jobs().await? {
            if record.released || record.age(now) <= max_age {
                continue;
            }
            let token: JobToken = match record.id.parse() {
                Ok(t) => t,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "skipping unparseable tracking record");
                    continue;
                }
            };
            if self.store.mark_released(&token).await? == MarkReleased::Released {
                debug!(token = %token, api_type = %record.api_type, "stale record swept");
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Counter health against tracked records, without changing anything.
    pub async fn diagnose(&self) -> CoreResult<Diagnosis> {
        let settings = self.settings.current().await?;
        let now = self.clock.now();
        let counter = self.store.in_flight().await?.value;
        let tracked = self
            .store
            .jobs()
            .await?
            .iter()
            .filter(|j| j.is_live(now))
            .count() as u64;
        Ok(Diagnosis::assess(
            counter,
            tracked,
            settings.reconciler_max_drift,
        ))
    }
}
