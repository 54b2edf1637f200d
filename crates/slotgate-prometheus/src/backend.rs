use std::sync::Arc;

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    proto::MetricFamily,
};

use slotgate_core::{
    metrics::{AcquireOutcome, MetricsBackend},
    tracker::Limit,
};

const NAMESPACE: &str = "slotgate";

/// Prometheus metrics backend.
///
/// All labels are bounded: `api_type` comes from the embedding workers, the rest are
/// fixed enumerations.
#[derive(Clone)]
pub struct PrometheusMetrics {
    acquire: CounterVec,
    acquire_wait: HistogramVec,
    denied: IntCounterVec,
    release: IntCounterVec,
    in_flight: IntGauge,
    reconcile: IntCounterVec,
    swept: IntCounter,
    admitted: IntCounter,
    admission_skipped: IntCounterVec,
    retry: IntCounterVec,
    registry: Arc<Registry>,
}

impl PrometheusMetrics {
    /// Create the backend and register every metric on `registry`.
    pub fn new_with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let acquire = CounterVec::new(
            Opts::new("acquire_total", "Blocking acquires by outcome").namespace(NAMESPACE),
            &["api_type", "outcome"],
        )?;
        registry.register(Box::new(acquire.clone()))?;

        let acquire_wait = HistogramVec::new(
            HistogramOpts::new("acquire_wait_seconds", "Time spent waiting for a slot")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
            &["api_type"],
        )?;
        registry.register(Box::new(acquire_wait.clone()))?;

        let denied = IntCounterVec::new(
            Opts::new("denied_total", "Acquire attempts denied by a limit").namespace(NAMESPACE),
            &["limit"],
        )?;
        registry.register(Box::new(denied.clone()))?;

        let release = IntCounterVec::new(
            Opts::new("release_total", "Slot releases").namespace(NAMESPACE),
            &["result"],
        )?;
        registry.register(Box::new(release.clone()))?;

        let in_flight = IntGauge::with_opts(
            Opts::new("in_flight", "Last observed in-flight counter").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(in_flight.clone()))?;

        let reconcile = IntCounterVec::new(
            Opts::new("reconcile_total", "Reconciler cycles by action").namespace(NAMESPACE),
            &["action"],
        )?;
        registry.register(Box::new(reconcile.clone()))?;

        let swept = IntCounter::with_opts(
            Opts::new("reconcile_swept_total", "Stale tracking records marked released")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(swept.clone()))?;

        let admitted = IntCounter::with_opts(
            Opts::new("admitted_total", "Jobs promoted to active").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(admitted.clone()))?;

        let admission_skipped = IntCounterVec::new(
            Opts::new("admission_skipped_total", "Admission cycles that admitted nothing")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        registry.register(Box::new(admission_skipped.clone()))?;

        let retry = IntCounterVec::new(
            Opts::new("retry_total", "Failed jobs by routing decision").namespace(NAMESPACE),
            &["decision"],
        )?;
        registry.register(Box::new(retry.clone()))?;

        Ok(Self {
            acquire,
            acquire_wait,
            denied,
            release,
            in_flight,
            reconcile,
            swept,
            admitted,
            admission_skipped,
            retry,
            registry,
        })
    }

    /// Create the backend on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::new_with_registry(Arc::new(Registry::new()))
    }

    /// Gather all metrics for exposition.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_acquire(&self, api_type: &str, outcome: AcquireOutcome, wait_ms: u64) {
        self.acquire
            .with_label_values(&[api_type, outcome.as_label()])
            .inc();
        self.acquire_wait
            .with_label_values(&[api_type])
            .observe(wait_ms as f64 / 1000.0);
    }

    fn record_denied(&self, limit: Limit) {
        self.denied.with_label_values(&[limit.as_label()]).inc();
    }

    fn record_release(&self, corrupted: bool) {
        let result = if corrupted { "corruption" } else { "released" };
        self.release.with_label_values(&[result]).inc();
    }

    fn set_in_flight(&self, value: u64) {
        self.in_flight.set(i64::try_from(value).unwrap_or(i64::MAX));
    }

    fn record_reconcile(&self, action: &str, swept: u64) {
        self.reconcile.with_label_values(&[action]).inc();
        self.swept.inc_by(swept);
    }

    fn record_admission(&self, admitted: u64, skipped: Option<&str>) {
        self.admitted.inc_by(admitted);
        if let Some(reason) = skipped {
            self.admission_skipped.with_label_values(&[reason]).inc();
        }
    }

    fn record_retry(&self, decision: &str) {
        self.retry.with_label_values(&[decision]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| panic!("metric {name} not found"))
    }

    #[test]
    fn acquire_records_counter_and_wait() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_acquire("ocr", AcquireOutcome::Acquired, 120);
        metrics.record_acquire("ocr", AcquireOutcome::TimedOut, 900_000);
        metrics.record_acquire("classify", AcquireOutcome::Acquired, 0);

        let families = metrics.gather();
        assert_eq!(family(&families, "slotgate_acquire_total").get_metric().len(), 3);
        assert_eq!(family(&families, "slotgate_acquire_wait_seconds").get_metric().len(), 2);
    }

    #[test]
    fn denials_are_labelled_by_limit() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_denied(Limit::InFlight);
        metrics.record_denied(Limit::InFlight);
        metrics.record_denied(Limit::Rpm);

        assert_eq!(metrics.denied.with_label_values(&["in_flight"]).get(), 2);
        assert_eq!(metrics.denied.with_label_values(&["rpm"]).get(), 1);
        assert_eq!(metrics.denied.with_label_values(&["backoff"]).get(), 0);
    }

    #[test]
    fn gauge_and_cycle_counters() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.set_in_flight(7);
        metrics.record_reconcile("reset_tracked", 2);
        metrics.record_reconcile("unchanged", 0);
        metrics.record_admission(4, None);
        metrics.record_admission(0, Some("in_flight_ceiling"));
        metrics.record_retry("dead_lettered");
        metrics.record_release(true);

        assert_eq!(metrics.in_flight.get(), 7);
        assert_eq!(metrics.swept.get(), 2);
        assert_eq!(metrics.admitted.get(), 4);
        assert_eq!(
            metrics
                .admission_skipped
                .with_label_values(&["in_flight_ceiling"])
                .get(),
            1
        );
        assert_eq!(metrics.retry.with_label_values(&["dead_lettered"]).get(), 1);
        assert_eq!(metrics.release.with_label_values(&["corruption"]).get(), 1);
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = Arc::new(Registry::new());
        PrometheusMetrics::new_with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetrics::new_with_registry(registry).is_err());
    }

    #[test]
    fn text_encoding_works() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.set_in_flight(3);

        let mut buf = Vec::new();
        TextEncoder::new().encode(&metrics.gather(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("slotgate_in_flight 3"));
    }
}
