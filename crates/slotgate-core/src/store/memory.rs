use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use slotgate_model::{
    GlobalBackoff, InFlightCounter, InFlightJobRecord, JobToken, MinuteKey, RpmWindow,
};
use time::OffsetDateTime;

use super::{MarkReleased, SlotStore, StoreError, StoreResult, TrackingCleared};
use crate::clock::{ClockHandle, system_clock};

#[derive(Default)]
struct State {
    counter: Option<InFlightCounter>,
    windows: HashMap<String, RpmWindow>,
    jobs: HashMap<String, InFlightJobRecord>,
    backoff: Option<GlobalBackoff>,
}

/// Process-local store; every operation runs under one mutex.
///
/// Expiry is evaluated lazily against the injected clock.
pub struct MemorySlotStore {
    state: Mutex<State>,
    clock: ClockHandle,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: ClockHandle) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".into()))
    }

    /// Drop expired windows and job records.
    fn purge_expired(&self, state: &mut State) {
        let now = self.clock.now();
        state.windows.retain(|_, w| !w.is_expired(now));
        state.jobs.retain(|_, j| !j.is_expired(now));
    }
}

impl Default for MemorySlotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn in_flight(&self) -> StoreResult<InFlightCounter> {
        let state = self.state()?;
        Ok(state.counter.clone().unwrap_or_else(InFlightCounter::empty))
    }

    async fn try_increment_in_flight(&self, max: u64, now: OffsetDateTime) -> StoreResult<Option<u64>> {
        let mut state = self.state()?;
        let current = state.counter.as_ref().map(|c| c.value).unwrap_or(0);
        if current >= max {
            return Ok(None);
        }
        state.counter = Some(InFlightCounter::new(current + 1, now));
        Ok(Some(current + 1))
    }

    async fn try_decrement_in_flight(&self, now: OffsetDateTime) -> StoreResult<Option<u64>> {
        let mut state = self.state()?;
        let current = state.counter.as_ref().map(|c| c.value).unwrap_or(0);
        if current == 0 {
            return Ok(None);
        }
        state.counter = Some(InFlightCounter::new(current - 1, now));
        Ok(Some(current - 1))
    }

    async fn compare_and_set_in_flight(
        &self,
        expected: u64,
        new: u64,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        let current = state.counter.as_ref().map(|c| c.value).unwrap_or(0);
        if current != expected {
            return Ok(false);
        }
        state.counter = Some(InFlightCounter::new(new, now));
        Ok(true)
    }

    async fn reset_in_flight(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut state = self.state()?;
        let previous = state.counter.as_ref().map(|c| c.value).unwrap_or(0);
        state.counter = Some(InFlightCounter::new(0, now));
        Ok(previous)
    }

    async fn rpm_window(&self, key: &MinuteKey) -> StoreResult<Option<RpmWindow>> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        Ok(state.windows.get(&key.record_id()).cloned())
    }

    async fn try_increment_rpm(
        &self,
        key: &MinuteKey,
        max: u64,
        expires_at: i64,
    ) -> StoreResult<Option<u64>> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        let window = state
            .windows
            .entry(key.record_id())
            .or_insert_with(|| RpmWindow::new(key, 0, expires_at));
        if window.request_count >= max {
            return Ok(None);
        }
        window.request_count += 1;
        Ok(Some(window.request_count))
    }

    async fn put_job(&self, record: &InFlightJobRecord) -> StoreResult<()> {
        let mut state = self.state()?;
        state.jobs.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn job(&self, token: &JobToken) -> StoreResult<Option<InFlightJobRecord>> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        Ok(state.jobs.get(&token.record_id()).cloned())
    }

    async fn mark_released(&self, token: &JobToken) -> StoreResult<MarkReleased> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        let outcome = match state.jobs.get_mut(&token.record_id()) {
            None => MarkReleased::Missing,
            Some(rec) if rec.released => MarkReleased::AlreadyReleased,
            Some(rec) => {
                rec.released = true;
                MarkReleased::Released
            }
        };
        Ok(outcome)
    }

    async fn jobs(&self) -> StoreResult<Vec<InFlightJobRecord>> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        let mut jobs: Vec<_> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(jobs)
    }

    async fn clear_tracking(&self) -> StoreResult<TrackingCleared> {
        let mut state = self.state()?;
        self.purge_expired(&mut state);
        let cleared = TrackingCleared {
            jobs: state.jobs.len() as u64,
            windows: state.windows.len() as u64,
        };
        state.jobs.clear();
        state.windows.clear();
        Ok(cleared)
    }

    async fn global_backoff(&self) -> StoreResult<Option<GlobalBackoff>> {
        let state = self.state()?;
        Ok(state.backoff.clone())
    }

    async fn extend_global_backoff(&self, until: i64) -> StoreResult<GlobalBackoff> {
        let mut state = self.state()?;
        let next = match state.backoff.take() {
            Some(current) if current.backoff_until >= until => current,
            _ => GlobalBackoff::until(until),
        };
        state.backoff = Some(next.clone());
        Ok(next)
    }

    async fn clear_global_backoff(&self) -> StoreResult<bool> {
        let mut state = self.state()?;
        Ok(state.backoff.take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::Arc;
    use std::time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

    fn store() -> MemorySlotStore {
        MemorySlotStore::with_clock(VirtualClock::starting_at(T0).handle())
    }

    #[tokio::test]
    async fn missing_counter_reads_zero() {
        let s = store();
        assert_eq!(s.in_flight().await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn increment_is_bounded_by_max() {
        let s = store();
        assert_eq!(s.try_increment_in_flight(2, T0).await.unwrap(), Some(1));
        assert_eq!(s.try_increment_in_flight(2, T0).await.unwrap(), Some(2));
        assert_eq!(s.try_increment_in_flight(2, T0).await.unwrap(), None);
        assert_eq!(s.in_flight().await.unwrap().value, 2);
    }

    #[tokio::test]
    async fn decrement_is_floored_at_zero() {
        let s = store();
        assert_eq!(s.try_decrement_in_flight(T0).await.unwrap(), None);
        s.try_increment_in_flight(5, T0).await.unwrap();
        assert_eq!(s.try_decrement_in_flight(T0).await.unwrap(), Some(0));
        assert_eq!(s.try_decrement_in_flight(T0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_set_only_on_match() {
        let s = store();
        s.try_increment_in_flight(5, T0).await.unwrap();
        assert!(!s.compare_and_set_in_flight(0, 7, T0).await.unwrap());
        assert!(s.compare_and_set_in_flight(1, 0, T0).await.unwrap());
        assert_eq!(s.in_flight().await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn rpm_window_is_bounded_and_created_lazily() {
        let s = store();
        let key = MinuteKey::at(T0);
        assert!(s.rpm_window(&key).await.unwrap().is_none());

        let exp = T0.unix_timestamp() + 120;
        assert_eq!(s.try_increment_rpm(&key, 2, exp).await.unwrap(), Some(1));
        assert_eq!(s.try_increment_rpm(&key, 2, exp).await.unwrap(), Some(2));
        assert_eq!(s.try_increment_rpm(&key, 2, exp).await.unwrap(), None);
        assert_eq!(s.rpm_window(&key).await.unwrap().unwrap().request_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_records_disappear() {
        let s = store();
        let key = MinuteKey::at(T0);
        s.try_increment_rpm(&key, 10, T0.unix_timestamp() + 120).await.unwrap();
        let rec = InFlightJobRecord::new(&JobToken::new(), "ocr", T0, time::Duration::minutes(5));
        s.put_job(&rec).await.unwrap();

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(s.rpm_window(&key).await.unwrap().is_none());
        assert_eq!(s.jobs().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(s.jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_released_is_idempotent() {
        let s = store();
        let token = JobToken::new();
        assert_eq!(s.mark_released(&token).await.unwrap(), MarkReleased::Missing);

        s.put_job(&InFlightJobRecord::new(&token, "ocr", T0, time::Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(s.mark_released(&token).await.unwrap(), MarkReleased::Released);
        assert_eq!(
            s.mark_released(&token).await.unwrap(),
            MarkReleased::AlreadyReleased
        );
        assert!(s.job(&token).await.unwrap().unwrap().released);
    }

    #[tokio::test]
    async fn backoff_only_extends() {
        let s = store();
        assert_eq!(s.extend_global_backoff(100).await.unwrap().backoff_until, 100);
        assert_eq!(s.extend_global_backoff(50).await.unwrap().backoff_until, 100);
        assert_eq!(s.extend_global_backoff(150).await.unwrap().backoff_until, 150);
        assert!(s.clear_global_backoff().await.unwrap());
        assert!(s.global_backoff().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_tracking_drops_jobs_and_windows() {
        let s = store();
        let key = MinuteKey::at(T0);
        for _ in 0..5 {
            s.try_increment_rpm(&key, 10, T0.unix_timestamp() + 120).await.unwrap();
        }
        let token = JobToken::new();
        s.put_job(&InFlightJobRecord::new(&token, "ocr", T0, time::Duration::hours(1)))
            .await
            .unwrap();
        s.try_increment_in_flight(5, T0).await.unwrap();

        let cleared = s.clear_tracking().await.unwrap();
        assert_eq!(cleared, TrackingCleared { jobs: 1, windows: 1 });
        assert!(s.rpm_window(&key).await.unwrap().is_none());
        assert!(s.job(&token).await.unwrap().is_none());
        assert_eq!(s.in_flight().await.unwrap().value, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_never_exceed_max() {
        let s = Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let s = Arc::clone(&s);
            handles.push(tokio::spawn(async move {
                s.try_increment_in_flight(10, T0).await.unwrap()
            }));
        }
        let mut granted = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(s.in_flight().await.unwrap().value, 10);
    }
}
