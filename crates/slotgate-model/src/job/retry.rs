use serde::{Deserialize, Serialize};

/// Retry bookkeeping attached to every job.
///
/// `retry_count` only grows; once `max_retries_exceeded` is set the job is never admitted again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryMetadata {
    pub retry_count: u32,
    pub max_retries_exceeded: bool,
}

impl RetryMetadata {
    /// Metadata after one more failure under a `max_retries` budget.
    pub fn after_failure(&self, max_retries: u32) -> Self {
        let retry_count = self.retry_count.saturating_add(1);
        Self {
            retry_count,
            max_retries_exceeded: self.max_retries_exceeded || retry_count >= max_retries,
        }
    }

    pub fn is_admissible(&self) -> bool {
        !self.max_retries_exceeded
    }
}
