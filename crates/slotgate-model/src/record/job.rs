use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::JOB_RECORD_PREFIX;
use crate::error::{ModelError, ModelResult};

/// Identity of one admitted external call.
///
/// Rendered as `job_<uuid>`, which is also the id of its [`InFlightJobRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobToken(Uuid);

impl JobToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn record_id(&self) -> String {
        format!("{JOB_RECORD_PREFIX}{}", self.0)
    }
}

impl Default for JobToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{JOB_RECORD_PREFIX}{}", self.0)
    }
}

impl FromStr for JobToken {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        let raw = s.trim();
        let uuid = raw
            .strip_prefix(JOB_RECORD_PREFIX)
            .and_then(|rest| Uuid::parse_str(rest).ok())
            .ok_or_else(|| ModelError::InvalidRecordId(raw.to_string()))?;
        Ok(Self(uuid))
    }
}

/// Per-call tracking record; ground truth for drift repair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightJobRecord {
    pub id: String,
    pub api_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub released: bool,
    pub expires_at: i64,
}

impl InFlightJobRecord {
    pub fn new(token: &JobToken, api_type: &str, started_at: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            id: token.record_id(),
            api_type: api_type.to_string(),
            started_at,
            released: false,
            expires_at: (started_at + ttl).unix_timestamp(),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now.unix_timestamp()
    }

    /// Unreleased and not yet expired; counted as tracked in-flight.
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        !self.released && !self.is_expired(now)
    }

    pub fn age(&self, now: OffsetDateTime) -> Duration {
        now - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn token_parses_its_own_rendering() {
        let t = JobToken::new();
        let parsed: JobToken = t.to_string().parse().unwrap();
        assert_eq!(parsed, t);
        assert_eq!(t.record_id(), t.to_string());
    }

    #[test]
    fn token_rejects_foreign_ids() {
        assert!("rpm_window_20240101_0000".parse::<JobToken>().is_err());
        assert!("job_not-a-uuid".parse::<JobToken>().is_err());
    }

    #[test]
    fn record_liveness_follows_release_and_ttl() {
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let mut rec = InFlightJobRecord::new(&JobToken::new(), "ocr", start, Duration::hours(1));

        assert!(rec.is_live(start + Duration::minutes(59)));
        assert!(!rec.is_live(start + Duration::hours(1)));

        rec.released = true;
        assert!(!rec.is_live(start));
        assert_eq!(rec.age(start + Duration::minutes(5)), Duration::minutes(5));
    }

    #[test]
    fn record_serializes_with_exact_field_names() {
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let rec = InFlightJobRecord::new(&JobToken::new(), "ocr", start, Duration::hours(1));
        let json = serde_json::to_value(&rec).unwrap();

        assert!(json["id"].as_str().unwrap().starts_with("job_"));
        assert_eq!(json["api_type"], "ocr");
        assert_eq!(json["started_at"], "2024-05-01T10:00:00Z");
        assert_eq!(json["released"], false);
        assert_eq!(json["expires_at"], start.unix_timestamp() + 3600);
    }
}
