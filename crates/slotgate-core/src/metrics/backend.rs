use std::sync::Arc;

use crate::tracker::Limit;

/// How a blocking acquire ended, for metrics classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Slot granted.
    Acquired,
    /// Hard ceiling reached before a slot was granted.
    TimedOut,
    /// Store failure.
    Error,
}

impl AcquireOutcome {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            AcquireOutcome::Acquired => "acquired",
            AcquireOutcome::TimedOut => "timeout",
            AcquireOutcome::Error => "error",
        }
    }
}

/// Backend metrics collection interface.
pub trait MetricsBackend: Send + Sync + 'static {
    /// Record the end of a blocking acquire.
    ///
    /// # Arguments
    /// - `api_type`: Kind of external call requested
    /// - `outcome`: How the acquire ended
    /// - `wait_ms`: Time spent waiting for capacity
    fn record_acquire(&self, api_type: &str, outcome: AcquireOutcome, wait_ms: u64);
    /// Record one denial by a limit (every retry inside an acquire counts).
    fn record_denied(&self, limit: Limit);
    /// Record a release.
    ///
    /// `corrupted` is true when the decrement would have gone negative.
    fn record_release(&self, corrupted: bool);
    /// Publish the last observed in-flight counter value.
    fn set_in_flight(&self, value: u64);
    /// Record one reconciler cycle and the action it took.
    fn record_reconcile(&self, action: &str, swept: u64);
    /// Record one admission cycle.
    ///
    /// `skipped` names the reason when nothing was considered for admission.
    fn record_admission(&self, admitted: u64, skipped: Option<&str>);
    /// Record a retry routing decision (`requeued` or `dead_lettered`).
    fn record_retry(&self, decision: &str);
}

/// Shared handle to metrics backend.
pub type MetricsHandle = Arc<dyn MetricsBackend>;
