//! Metrics collection abstraction for the gate components.
//!
//! Backends (prometheus, statsd, etc) implement [`MetricsBackend`] and are handed to
//! [`crate::tracker::SlotTracker`], [`crate::reconciler::Reconciler`], [`crate::admission::QueueAdmission`]
//! and [`crate::retry::RetryRouter`] at construction.
mod backend;
pub use backend::{AcquireOutcome, MetricsBackend, MetricsHandle};

mod noop;
pub use noop::NoOpMetrics;

use std::sync::Arc;

/// Create a no-op metrics handle.
#[inline]
pub fn noop_metrics() -> MetricsHandle {
    Arc::new(NoOpMetrics)
}
