use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Stable identity of a queued job: a relative, `/`-separated path.
///
/// The key never changes while the job moves between tiers, so moves keyed by it
/// are idempotent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobKey(String);

impl JobKey {
    pub fn new(raw: impl Into<String>) -> ModelResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidJobKey("empty".into()));
        }
        if trimmed.starts_with('/') || trimmed.contains('\\') {
            return Err(ModelError::InvalidJobKey(trimmed.to_string()));
        }
        let bad_segment = trimmed
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
        if bad_segment {
            return Err(ModelError::InvalidJobKey(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading path segment when the key is nested, e.g. `acme` in `acme/invoice.pdf`.
    pub fn collection(&self) -> Option<&str> {
        self.0.split_once('/').map(|(head, _)| head)
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path segments, for mapping onto a directory tree.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobKey {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobKey {
    type Error = ModelError;
    fn try_from(value: String) -> ModelResult<Self> {
        Self::new(value)
    }
}

impl From<JobKey> for String {
    fn from(k: JobKey) -> Self {
        k.0
    }
}
