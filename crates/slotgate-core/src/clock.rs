//! Wall-clock source for minute windows, record timestamps and expiry.
//!
//! Sleeping always goes through `tokio::time`; [`VirtualClock`] derives wall time from
//! tokio's clock so that paused-time tests move both together.
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::Instant;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

pub type ClockHandle = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[inline]
pub fn system_clock() -> ClockHandle {
    Arc::new(SystemClock)
}

/// Wall time anchored at a fixed instant and advanced by tokio's clock.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    wall: OffsetDateTime,
    anchor: Instant,
}

impl VirtualClock {
    pub fn starting_at(wall: OffsetDateTime) -> Self {
        Self {
            wall,
            anchor: Instant::now(),
        }
    }

    pub fn handle(self) -> ClockHandle {
        Arc::new(self)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> OffsetDateTime {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        self.wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    #[tokio::test(start_paused = true)]
    async fn virtual_clock_follows_tokio_time() {
        let clock = VirtualClock::starting_at(datetime!(2024-05-01 10:00:00 UTC));
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), datetime!(2024-05-01 10:01:30 UTC));
    }

    #[test]
    fn system_clock_is_utc() {
        assert!(SystemClock.now().offset().is_utc());
    }
}
