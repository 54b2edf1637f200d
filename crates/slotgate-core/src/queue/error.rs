use std::path::Path;

use thiserror::Error;

use slotgate_model::JobKey;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobKey),

    #[error("io error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("corrupt entry at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    pub(crate) fn io(path: &Path, e: std::io::Error) -> Self {
        QueueError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> Self {
        QueueError::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
