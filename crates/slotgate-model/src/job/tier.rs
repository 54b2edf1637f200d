use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Queue partition. Admission drains tiers in [`QueueTier::DRAIN_ORDER`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTier {
    /// Jobs requeued after a failure.
    Priority,
    /// Newly submitted jobs.
    Standard,
}

impl QueueTier {
    pub const DRAIN_ORDER: [QueueTier; 2] = [QueueTier::Priority, QueueTier::Standard];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueTier::Priority => "priority",
            QueueTier::Standard => "standard",
        }
    }
}

impl fmt::Display for QueueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueTier {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" | "retry" => Ok(QueueTier::Priority),
            "standard" | "queue" | "" => Ok(QueueTier::Standard),
            other => Err(ModelError::UnknownTier(other.to_string())),
        }
    }
}

/// Where a job currently sits in its lifecycle.
///
/// `Queued -> Active -> {Succeeded, failed}`; a failed job goes back to `Queued` or to `DeadLettered`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued(QueueTier),
    Active,
    Succeeded,
    DeadLettered,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::DeadLettered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_drains_first() {
        assert_eq!(QueueTier::DRAIN_ORDER[0], QueueTier::Priority);
    }

    #[test]
    fn tier_parses_legacy_folder_names() {
        assert_eq!("retry".parse::<QueueTier>().unwrap(), QueueTier::Priority);
        assert_eq!("Queue".parse::<QueueTier>().unwrap(), QueueTier::Standard);
        assert!(matches!(
            "urgent".parse::<QueueTier>(),
            Err(ModelError::UnknownTier(_))
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::DeadLettered.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Queued(QueueTier::Standard).is_terminal());
    }
}
