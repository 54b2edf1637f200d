use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::record::{GlobalBackoff, InFlightCounter, MinuteKey, RpmWindow};

/// Read-only snapshot of gate utilization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub in_flight: u64,
    pub max_in_flight: u64,
    pub in_flight_pct: f64,
    pub available: u64,
    pub minute: String,
    pub rpm_count: u64,
    pub max_rpm: u64,
    pub rpm_pct: f64,
    pub backoff_remaining_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

impl Usage {
    pub fn compute(
        counter: &InFlightCounter,
        max_in_flight: u64,
        key: &MinuteKey,
        window: Option<&RpmWindow>,
        max_rpm: u64,
        backoff: Option<&GlobalBackoff>,
        now: OffsetDateTime,
    ) -> Self {
        let rpm_count = window.map(|w| w.request_count).unwrap_or(0);
        let last_updated =
            (counter.last_updated != OffsetDateTime::UNIX_EPOCH).then_some(counter.last_updated);
        let backoff_remaining_secs = backoff
            .map(|b| b.remaining(now).whole_seconds().max(0) as u64)
            .unwrap_or(0);

        Self {
            in_flight: counter.value,
            max_in_flight,
            in_flight_pct: percent(counter.value, max_in_flight),
            available: max_in_flight.saturating_sub(counter.value),
            minute: key.as_str().to_string(),
            rpm_count,
            max_rpm,
            rpm_pct: percent(rpm_count, max_rpm),
            backoff_remaining_secs,
            last_updated,
        }
    }
}

fn percent(value: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    let pct = value as f64 / max as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn computes_utilization() {
        let now = datetime!(2024-05-01 10:00:30 UTC);
        let key = MinuteKey::at(now);
        let counter = InFlightCounter::new(3, now);
        let window = RpmWindow::new(&key, 50, now.unix_timestamp() + 90);
        let backoff = GlobalBackoff::until(now.unix_timestamp() + 12);

        let u = Usage::compute(&counter, 150, &key, Some(&window), 200, Some(&backoff), now);

        assert_eq!(u.in_flight, 3);
        assert_eq!(u.available, 147);
        assert_eq!(u.in_flight_pct, 2.0);
        assert_eq!(u.rpm_count, 50);
        assert_eq!(u.rpm_pct, 25.0);
        assert_eq!(u.minute, "20240501_1000");
        assert_eq!(u.backoff_remaining_secs, 12);
        assert_eq!(u.last_updated, Some(now));
    }

    #[test]
    fn missing_records_read_as_idle() {
        let now = datetime!(2024-05-01 10:00:30 UTC);
        let u = Usage::compute(
            &InFlightCounter::empty(),
            150,
            &MinuteKey::at(now),
            None,
            200,
            None,
            now,
        );
        assert_eq!(u.in_flight, 0);
        assert_eq!(u.rpm_count, 0);
        assert_eq!(u.available, 150);
        assert_eq!(u.last_updated, None);
    }

    #[test]
    fn over_count_reports_zero_available() {
        let now = datetime!(2024-05-01 10:00:30 UTC);
        let u = Usage::compute(
            &InFlightCounter::new(160, now),
            150,
            &MinuteKey::at(now),
            None,
            200,
            None,
            now,
        );
        assert_eq!(u.available, 0);
        assert!(u.in_flight_pct > 100.0);
    }
}
