use std::fmt;

use serde::{Deserialize, Serialize};

/// Verdict on the in-flight counter against tracked records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    /// Counter is positive while no call is tracked.
    Stuck,
    /// Counter exceeds tracked calls by more than the tolerated drift.
    Drifting,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Health::Healthy => "healthy",
            Health::Stuck => "stuck",
            Health::Drifting => "drifting",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub health: Health,
    pub counter: u64,
    pub tracked: u64,
    /// `counter - tracked`; negative when the counter under-reports.
    pub drift: i64,
    pub max_drift: u64,
    pub message: String,
}

impl Diagnosis {
    pub fn assess(counter: u64, tracked: u64, max_drift: u64) -> Self {
        let drift = i64::try_from(counter)
            .unwrap_or(i64::MAX)
            .saturating_sub(i64::try_from(tracked).unwrap_or(i64::MAX));

        let (health, message) = if counter > 0 && tracked == 0 {
            (
                Health::Stuck,
                format!("counter={counter} but no tracked calls; likely crashed workers"),
            )
        } else if counter.saturating_sub(tracked) > max_drift {
            (
                Health::Drifting,
                format!("counter={counter}, tracked={tracked}; drift exceeds {max_drift}"),
            )
        } else {
            (Health::Healthy, "counter matches tracked calls".to_string())
        };

        Self {
            health,
            counter,
            tracked,
            drift,
            max_drift,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_everything_is_healthy() {
        assert_eq!(Diagnosis::assess(0, 0, 5).health, Health::Healthy);
    }

    #[test]
    fn positive_counter_without_records_is_stuck() {
        let d = Diagnosis::assess(4, 0, 5);
        assert_eq!(d.health, Health::Stuck);
        assert_eq!(d.drift, 4);
    }

    #[test]
    fn drift_must_exceed_tolerance() {
        assert_eq!(Diagnosis::assess(15, 10, 5).health, Health::Healthy);
        assert_eq!(Diagnosis::assess(16, 10, 5).health, Health::Drifting);
    }

    #[test]
    fn under_count_is_not_drifting() {
        let d = Diagnosis::assess(2, 9, 5);
        assert_eq!(d.health, Health::Healthy);
        assert_eq!(d.drift, -7);
    }
}
