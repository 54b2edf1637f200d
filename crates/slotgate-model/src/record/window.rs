use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use super::RPM_WINDOW_PREFIX;

/// UTC calendar-minute bucket key in `YYYYMMDD_HHMM` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinuteKey(String);

impl MinuteKey {
    /// Key of the minute window containing `ts`.
    pub fn at(ts: OffsetDateTime) -> Self {
        let ts = ts.to_offset(UtcOffset::UTC);
        Self(format!(
            "{:04}{:02}{:02}_{:02}{:02}",
            ts.year(),
            u8::from(ts.month()),
            ts.day(),
            ts.hour(),
            ts.minute()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store id of the window record for this key.
    pub fn record_id(&self) -> String {
        format!("{RPM_WINDOW_PREFIX}{}", self.0)
    }

    /// Start of the minute window containing `ts`.
    pub fn window_start(ts: OffsetDateTime) -> OffsetDateTime {
        let into_minute = ts.unix_timestamp().rem_euclid(60);
        ts - Duration::seconds(into_minute) - Duration::nanoseconds(i64::from(ts.nanosecond()))
    }

    /// Start of the minute window following the one containing `ts`.
    pub fn next_window_start(ts: OffsetDateTime) -> OffsetDateTime {
        Self::window_start(ts) + Duration::minutes(1)
    }
}

impl fmt::Display for MinuteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requests started within one minute window.
///
/// Never decremented; the record disappears through expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmWindow {
    pub id: String,
    pub request_count: u64,
    pub expires_at: i64,
}

impl RpmWindow {
    pub fn new(key: &MinuteKey, request_count: u64, expires_at: i64) -> Self {
        Self {
            id: key.record_id(),
            request_count,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now.unix_timestamp()
    }
}
