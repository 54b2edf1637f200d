use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown configuration parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value for '{name}': {value} ({reason})")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unknown jitter strategy: {0}")]
    UnknownJitter(String),

    #[error("unknown queue tier: {0}")]
    UnknownTier(String),

    #[error("unknown failure kind: {0}")]
    UnknownFailureKind(String),

    #[error("invalid job key: {0}")]
    InvalidJobKey(String),

    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("invalid model: {0}")]
    Invalid(String),
}

impl ModelError {
    pub(crate) fn invalid_parameter(
        name: &str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ModelError::InvalidParameter {
            name: name.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
