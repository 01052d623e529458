//! Status projection from a scan's job onto the scan.

use k8s_openapi::api::batch::v1::Job;

use crate::crd::ScanStatus;

/// Projects a job's completion counters onto the scan status.
///
/// A scan is done once its job reports at least one successful completion.
/// Failures alone never mark it done.
#[must_use]
pub fn project(job: &Job) -> ScanStatus {
    let succeeded = job
        .status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or(0);
    ScanStatus {
        done: succeeded >= 1,
    }
}

/// Returns true if `projected` differs from what the scan currently reports.
///
/// A scan without a status reads as the default (not done).
#[must_use]
pub fn needs_write(current: Option<&ScanStatus>, projected: ScanStatus) -> bool {
    current.copied().unwrap_or_default() != projected
}
