//! Prometheus metrics backend for the slot gate.
//!
//! [`PrometheusMetrics`] implements [`slotgate_core::metrics::MetricsBackend`]. Exposition is left
//! to the embedding process; `slotgated` serves [`PrometheusMetrics::gather`] on `/metrics`.
//!
//! ## Metrics
//! - `slotgate_acquire_total{api_type, outcome}` - Counter
//! - `slotgate_acquire_wait_seconds{api_type}` - Histogram
//! - `slotgate_denied_total{limit}` - Counter
//! - `slotgate_release_total{result}` - Counter
//! - `slotgate_in_flight` - Gauge
//! - `slotgate_reconcile_total{action}` - Counter
//! - `slotgate_reconcile_swept_total` - Counter
//! - `slotgate_admitted_total` - Counter
//! - `slotgate_admission_skipped_total{reason}` - Counter
//! - `slotgate_retry_total{decision}` - Counter
mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
