use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::JobKey;
use crate::error::{ModelError, ModelResult};

/// How a job execution ended when it did not succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failed,
    TimedOut,
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Failed => "failed",
            FailureKind::TimedOut => "timed_out",
            FailureKind::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "failed" | "failure" => Ok(FailureKind::Failed),
            "timed_out" | "timeout" => Ok(FailureKind::TimedOut),
            "aborted" | "abort" => Ok(FailureKind::Aborted),
            other => Err(ModelError::UnknownFailureKind(other.to_string())),
        }
    }
}

/// One failure, kept for later batched notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job_key: JobKey,
    pub kind: FailureKind,
    pub reason: String,
    /// Count after this failure.
    pub retry_count: u32,
    pub max_retries_exceeded: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("TIMED-OUT".parse::<FailureKind>().unwrap(), FailureKind::TimedOut);
        assert_eq!("timeout".parse::<FailureKind>().unwrap(), FailureKind::TimedOut);
        assert_eq!("abort".parse::<FailureKind>().unwrap(), FailureKind::Aborted);
        assert!("exploded".parse::<FailureKind>().is_err());
    }

    #[test]
    fn record_is_json_line_friendly() {
        let rec = FailureRecord {
            job_key: JobKey::new("acme/a.pdf").unwrap(),
            kind: FailureKind::TimedOut,
            reason: "too many requests".into(),
            retry_count: 1,
            max_retries_exceeded: false,
            recorded_at: datetime!(2024-05-01 10:00:00 UTC),
        };
        let line = serde_json::to_string(&rec).unwrap();
        assert!(!line.contains('\n'));

        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["job_key"], "acme/a.pdf");
        assert_eq!(json["kind"], "timed_out");
        assert_eq!(json["recorded_at"], "2024-05-01T10:00:00Z");
    }
}
