use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::GLOBAL_BACKOFF_ID;

/// System-wide pause requested after the external API signalled overload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBackoff {
    pub id: String,
    pub backoff_until: i64,
}

impl GlobalBackoff {
    pub fn until(backoff_until: i64) -> Self {
        Self {
            id: GLOBAL_BACKOFF_ID.to_string(),
            backoff_until,
        }
    }

    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.backoff_until > now.unix_timestamp()
    }

    /// Time left until the backoff elapses; zero when inactive.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        let deadline = OffsetDateTime::from_unix_timestamp(self.backoff_until)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        if deadline > now {
            deadline - now
        } else {
            Duration::ZERO
        }
    }
}
