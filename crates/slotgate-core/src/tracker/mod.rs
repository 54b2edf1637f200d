//! Cross-process slot and rate tracking around every external call.
//!
//! Flow of [`SlotTracker::acquire`]:
//! 1. wait out any global backoff;
//! 2. take a token from the current minute's RPM window (kept until the minute rolls);
//! 3. take an in-flight slot;
//! 4. write the per-call tracking record.
//!
//! Each step is one conditional store operation. Denials sleep and start over from step 1
//! until the hard deadline passes.
mod error;
pub use error::{CallError, Limit, TrackerError, TrackerResult};

mod guard;
pub use guard::SlotGuard;
use guard::PendingSlot;

use std::{future::Future, sync::Arc, time::Duration};

use slotgate_model::{
    GateSettings, GlobalBackoff, InFlightJobRecord, JobToken, MinuteKey, Usage,
};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backoff::{jittered_delay, rollover_jitter},
    clock::{ClockHandle, system_clock},
    metrics::{AcquireOutcome, MetricsHandle, noop_metrics},
    settings::SettingsProvider,
    store::{MarkReleased, StoreHandle},
};

/// Upper bound of the random offset added after a minute rollover.
const ROLLOVER_JITTER: Duration = Duration::from_millis(500);

/// Outcome of one pass over the gates.
enum Attempt {
    Granted { in_flight: u64 },
    Denied { limit: Limit, wait: Duration },
}

/// Handle to the shared gate; cheap to clone.
#[derive(Clone)]
pub struct SlotTracker {
    store: StoreHandle,
    settings: Arc<SettingsProvider>,
    clock: ClockHandle,
    metrics: MetricsHandle,
}

impl SlotTracker {
    pub fn new(store: StoreHandle, settings: Arc<SettingsProvider>) -> Self {
        Self {
            store,
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

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Wait until both limits admit one more call, then take a slot.
    ///
    /// Fails only with [`TrackerError::SlotTimeout`] once `acquire_timeout_ms` has passed,
    /// or with a store/settings error. A timed-out acquire holds no in-flight slot.
    #[instrument(level = "debug", skip(self), fields(api_type = %api_type))]
    pub async fn acquire(&self, api_type: &str) -> TrackerResult<SlotGuard> {
        let started = Instant::now();
        let deadline = started + self.settings.current().await?.acquire_timeout();

        let mut rpm_held: Option<MinuteKey> = None;
        let mut attempt: u32 = 0;
        let mut prev_wait: Option<Duration> = None;

        loop {
            let settings = self.settings.current().await?;
            let pass = match self.attempt(&settings, &mut rpm_held).await {
                Ok(pass) => pass,
                Err(e) => {
                    self.metrics
                        .record_acquire(api_type, AcquireOutcome::Error, elapsed_ms(started));
                    return Err(e);
                }
            };

            let wait = match pass {
                Attempt::Granted { in_flight } => {
                    let guard = self.grant(api_type, &settings).await;
                    let outcome = if guard.is_ok() {
                        AcquireOutcome::Acquired
                    } else {
                        AcquireOutcome::Error
                    };
                    self.metrics
                        .record_acquire(api_type, outcome, elapsed_ms(started));
                    if guard.is_ok() {
                        debug!(in_flight, waited_ms = elapsed_ms(started), "slot acquired");
                    }
                    return guard;
                }
                Attempt::Denied {
                    limit: Limit::InFlight,
                    ..
                } => {
                    let wait = jittered_delay(&settings.acquire_backoff, attempt, prev_wait);
                    attempt = attempt.saturating_add(1);
                    prev_wait = Some(wait);
                    wait
                }
                Attempt::Denied { wait, .. } => wait,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(api_type, started));
            }
            tokio::time::sleep(wait.min(deadline - now)).await;
            if Instant::now() >= deadline {
                return Err(self.timed_out(api_type, started));
            }
        }
    }

    /// Single non-blocking attempt.
    ///
    /// Returns [`TrackerError::CapacityExceeded`] naming the first limit that denied the call.
    #[instrument(level = "debug", skip(self), fields(api_type = %api_type))]
    pub async fn try_acquire(&self, api_type: &str) -> TrackerResult<SlotGuard> {
        let settings = self.settings.current().await?;
        match self.attempt(&settings, &mut None).await? {
            Attempt::Granted { .. } => self.grant(api_type, &settings).await,
            Attempt::Denied { limit, .. } => Err(TrackerError::CapacityExceeded(limit)),
        }
    }

    /// Release the slot taken for `token`.
    ///
    /// Releasing an already released token is a no-op. A release that would drive the
    /// counter negative is rejected with [`TrackerError::CounterCorruption`].
    #[instrument(level = "debug", skip(self), fields(token = %token))]
    pub async fn release(&self, token: &JobToken) -> TrackerResult<()> {
        match self.store.mark_released(token).await? {
            MarkReleased::Released => {}
            MarkReleased::AlreadyReleased => {
                debug!("already released, counter untouched");
                return Ok(());
            }
            MarkReleased::Missing => {
                warn!("tracking record missing, decrementing anyway");
            }
        }

        match self.store.try_decrement_in_flight(self.clock.now()).await? {
            Some(in_flight) => {
                self.metrics.set_in_flight(in_flight);
                self.metrics.record_release(false);
                debug!(in_flight, "slot released");
                Ok(())
            }
            None => {
                self.metrics.set_in_flight(0);
                self.metrics.record_release(true);
                error!("in-flight counter already zero; decrement rejected");
                Err(TrackerError::CounterCorruption {
                    token: token.to_string(),
                })
            }
        }
    }

    /// Run `call` while holding a slot; the slot is released on every path.
    ///
    /// A failed release after the call is logged and does not hide the call's result.
    pub async fn with_slot<T, E, F, Fut>(&self, api_type: &str, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = self.acquire(api_type).await.map_err(CallError::Slot)?;
        let token = guard.token();
        let result = call().await;
        if let Err(e) = guard.release().await {
            warn!(token = %token, error = %e, "release after call failed");
        }
        result.map_err(CallError::ExternalApi)
    }

    /// Pause every worker for at least `duration`.
    ///
    /// Extends an active backoff but never shortens it.
    #[instrument(level = "debug", skip(self))]
    pub async fn signal_overload(&self, duration: Duration) -> TrackerResult<GlobalBackoff> {
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        let until = self
            .clock
            .now()
            .unix_timestamp()
            .saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
        let backoff = self.store.extend_global_backoff(until).await?;
        warn!(backoff_until = backoff.backoff_until, "global backoff in effect");
        Ok(backoff)
    }

    pub async fn clear_overload(&self) -> TrackerResult<bool> {
        let cleared = self.store.clear_global_backoff().await?;
        if cleared {
            info!("global backoff cleared");
        }
        Ok(cleared)
    }

    /// Read-only utilization snapshot.
    pub async fn usage(&self) -> TrackerResult<Usage> {
        let settings = self.settings.current().await?;
        let now = self.clock.now();
        let key = MinuteKey::at(now);

        let counter = self.store.in_flight().await?;
        let window = self.store.rpm_window(&key).await?;
        let backoff = self.store.global_backoff().await?;
        self.metrics.set_in_flight(counter.value);

        Ok(Usage::compute(
            &counter,
            settings.max_in_flight,
            &key,
            window.as_ref(),
            settings.max_rpm,
            backoff.as_ref(),
            now,
        ))
    }

    /// One pass over backoff, RPM and in-flight gates.
    ///
    /// `rpm_held` carries a window token across passes inside the same minute.
    async fn attempt(
        &self,
        settings: &GateSettings,
        rpm_held: &mut Option<MinuteKey>,
    ) -> TrackerResult<Attempt> {
        let now = self.clock.now();

        if let Some(backoff) = self.store.global_backoff().await? {
            if backoff.is_active(now) {
                self.metrics.record_denied(Limit::Backoff);
                return Ok(Attempt::Denied {
                    limit: Limit::Backoff,
                    wait: to_std(backoff.remaining(now)),
                });
            }
        }

        let key = MinuteKey::at(now);
        if rpm_held.as_ref() != Some(&key) {
            let expires_at = (MinuteKey::window_start(now) + settings.rpm_window_ttl()).unix_timestamp();
            match self
                .store
                .try_increment_rpm(&key, settings.max_rpm, expires_at)
                .await?
            {
                Some(count) => {
                    debug!(minute = %key, count, "rpm token taken");
                    *rpm_held = Some(key);
                }
                None => {
                    self.metrics.record_denied(Limit::Rpm);
                    let wait = to_std(MinuteKey::next_window_start(now) - now)
                        + rollover_jitter(ROLLOVER_JITTER);
                    return Ok(Attempt::Denied {
                        limit: Limit::Rpm,
                        wait,
                    });
                }
            }
        }

        match self
            .store
            .try_increment_in_flight(settings.max_in_flight, now)
            .await?
        {
            Some(in_flight) => {
                self.metrics.set_in_flight(in_flight);
                Ok(Attempt::Granted { in_flight })
            }
            None => {
                self.metrics.record_denied(Limit::InFlight);
                Ok(Attempt::Denied {
                    limit: Limit::InFlight,
                    wait: settings.acquire_backoff.first(),
                })
            }
        }
    }

    /// Write the tracking record for a granted slot.
    ///
    /// The slot is rolled back if the write fails or the caller stops polling before it lands.
    async fn grant(&self, api_type: &str, settings: &GateSettings) -> TrackerResult<SlotGuard> {
        let pending = PendingSlot::new(self.clone());
        let token = JobToken::new();
        let now = self.clock.now();
        let record = InFlightJobRecord::new(&token, api_type, now, settings.job_record_ttl());

        if let Err(e) = self.store.put_job(&record).await {
            error!(token = %token, error = %e, "tracking record write failed, rolling back slot");
            pending.roll_back().await;
            return Err(e.into());
        }
        Ok(pending.into_guard(token, api_type.to_string()))
    }

    fn timed_out(&self, api_type: &str, started: Instant) -> TrackerError {
        let waited_ms = elapsed_ms(started);
        self.metrics
            .record_acquire(api_type, AcquireOutcome::TimedOut, waited_ms);
        warn!(api_type, waited_ms, "slot acquire timed out");
        TrackerError::SlotTimeout {
            api_type: api_type.to_string(),
            waited_ms,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn to_std(d: time::Duration) -> Duration {
    Duration::try_from(d).unwrap_or(Duration::ZERO)
}
