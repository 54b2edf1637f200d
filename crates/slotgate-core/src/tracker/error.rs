use std::fmt;

use thiserror::Error;

use crate::{settings::SettingsError, store::StoreError};

/// Which gate denied a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Concurrent-call ceiling reached.
    InFlight,
    /// Requests-per-minute ceiling reached for the current window.
    Rpm,
    /// A global backoff is in effect.
    Backoff,
}

impl Limit {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            Limit::InFlight => "in_flight",
            Limit::Rpm => "rpm",
            Limit::Backoff => "backoff",
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Transient; only surfaced by `try_acquire`.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(Limit),

    #[error("no slot for '{api_type}' after waiting {waited_ms}ms")]
    SlotTimeout { api_type: String, waited_ms: u64 },

    #[error("in-flight counter would go negative releasing {token}")]
    CounterCorruption { token: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Failure of a call made through [`super::SlotTracker::with_slot`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("slot error: {0}")]
    Slot(#[source] TrackerError),

    #[error("external api error: {0}")]
    ExternalApi(#[source] E),
}
