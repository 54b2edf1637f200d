use thiserror::Error;

use slotgate_model::ModelError;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {source_name}: {reason}")]
    Read { source_name: String, reason: String },

    #[error("failed to write settings to {source_name}: {reason}")]
    Write { source_name: String, reason: String },

    #[error("failed to parse settings: {0}")]
    Parse(String),

    #[error("invalid settings: {0}")]
    Invalid(#[from] ModelError),
}

pub type SettingsResult<T> = Result<T, SettingsError>;
