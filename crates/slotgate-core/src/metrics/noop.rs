use crate::metrics::backend::{AcquireOutcome, MetricsBackend};
use crate::tracker::Limit;

/// No-op metrics backend that compiles to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    #[inline(always)]
    fn record_acquire(&self, _: &str, _: AcquireOutcome, _: u64) {}

    #[inline(always)]
    fn record_denied(&self, _: Limit) {}

    #[inline(always)]
    fn record_release(&self, _: bool) {}

    #[inline(always)]
    fn set_in_flight(&self, _: u64) {}

    #[inline(always)]
    fn record_reconcile(&self, _: &str, _: u64) {}

    #[inline(always)]
    fn record_admission(&self, _: u64, _: Option<&str>) {}

    #[inline(always)]
    fn record_retry(&self, _: &str) {}
}
