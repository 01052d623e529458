//! Observability metrics for the scan operator.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `scanbox_reconcile_total` | Counter | `outcome` | Reconciliation passes by outcome |
//! | `scanbox_reconcile_errors_total` | Counter | `class` | Failed passes by error class |
//! | `scanbox_reconcile_duration_seconds` | Histogram | - | Wall time of one pass |
//! | `scanbox_jobs_created_total` | Counter | - | Jobs accepted by the cluster |
//! | `scanbox_owner_index_size` | Gauge | - | Jobs tracked by the owner index |
//!
//! Metrics go through the `metrics` facade; the operator binary installs a
//! Prometheus recorder and serves it on `/metrics`. Without a recorder every
//! call is a no-op.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

use crate::error::ErrorClass;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Reconciliation passes by outcome.
    pub const RECONCILE_TOTAL: &str = "scanbox_reconcile_total";
    /// Counter: Failed reconciliation passes by error class.
    pub const RECONCILE_ERRORS_TOTAL: &str = "scanbox_reconcile_errors_total";
    /// Histogram: Reconciliation pass duration in seconds.
    pub const RECONCILE_DURATION_SECONDS: &str = "scanbox_reconcile_duration_seconds";
    /// Counter: Jobs created.
    pub const JOBS_CREATED_TOTAL: &str = "scanbox_jobs_created_total";
    /// Gauge: Jobs tracked by the owner index.
    pub const OWNER_INDEX_SIZE: &str = "scanbox_owner_index_size";
}

/// Label keys used across metrics.
pub mod labels {
    /// Pass outcome (`job_created`, `status_updated`, ...).
    pub const OUTCOME: &str = "outcome";
    /// Error class (`transient`, `invariant_violation`, `permanent`).
    pub const CLASS: &str = "class";
}

/// Records operator metrics with consistent labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorMetrics;

impl OperatorMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a completed pass.
    pub fn record_outcome(&self, outcome: &'static str) {
        counter!(names::RECONCILE_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records a failed pass.
    pub fn record_error(&self, class: ErrorClass) {
        counter!(names::RECONCILE_ERRORS_TOTAL, labels::CLASS => class.as_str()).increment(1);
    }

    /// Records the duration of one pass.
    pub fn observe_reconcile_duration(&self, duration: Duration) {
        histogram!(names::RECONCILE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a job accepted by the cluster.
    pub fn record_job_created(&self) {
        counter!(names::JOBS_CREATED_TOTAL).increment(1);
    }

    /// Sets the owner index size.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_owner_index_size(&self, jobs: usize) {
        gauge!(names::OWNER_INDEX_SIZE).set(jobs as f64);
    }
}

/// RAII guard for timing operations.
///
/// Calls the callback with the elapsed duration when dropped, so early returns
/// through `?` are timed too.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard that records a reconciliation pass duration.
#[must_use]
pub fn time_reconcile(metrics: OperatorMetrics) -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(move |duration| metrics.observe_reconcile_duration(duration))
}
