use thiserror::Error;

use crate::{
    queue::QueueError, runner::RunnerError, settings::SettingsError, store::StoreError,
    tracker::TrackerError,
};

/// Umbrella error for callers that drive several components at once.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

pub type CoreResult<T> = Result<T, CoreError>;
