//! Queued work as seen by admission and retry routing.
mod key;
pub use key::JobKey;

mod tier;
pub use tier::{JobState, QueueTier};

mod retry;
pub use retry::RetryMetadata;

mod failure;
pub use failure::{FailureKind, FailureRecord};
