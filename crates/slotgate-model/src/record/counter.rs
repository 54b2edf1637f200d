use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::IN_FLIGHT_COUNTER_ID;

/// Number of external calls currently believed to be in progress.
///
/// Only ever mutated through the store's atomic conditional operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightCounter {
    pub id: String,
    pub value: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl InFlightCounter {
    pub fn new(value: u64, last_updated: OffsetDateTime) -> Self {
        Self {
            id: IN_FLIGHT_COUNTER_ID.to_string(),
            value,
            last_updated,
        }
    }

    /// Counter as read when the record does not exist yet.
    pub fn empty() -> Self {
        Self::new(0, OffsetDateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn serializes_with_exact_field_names() {
        let c = InFlightCounter::new(3, datetime!(2024-05-01 12:30:00 UTC));
        let json = serde_json::to_value(&c).unwrap();

        assert_eq!(json["id"], "in_flight");
        assert_eq!(json["value"], 3);
        assert_eq!(json["last_updated"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn empty_counter_is_zero() {
        assert_eq!(InFlightCounter::empty().value, 0);
    }
}
