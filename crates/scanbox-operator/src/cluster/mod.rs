//! Cluster access seam for the reconciliation engine.
//!
//! This module provides:
//!
//! - [`ScanCluster`]: the reads and writes one reconciliation pass needs
//! - [`KubeCluster`]: the Kubernetes API implementation
//! - [`MemoryCluster`]: an in-memory cluster for tests and local runs
//!
//! Absent objects are `Ok(None)`, never errors. Job submission reports a
//! conflict as [`Error::AlreadyExists`], which the engine answers with a short
//! requeue.
//!
//! [`Error::AlreadyExists`]: crate::error::Error::AlreadyExists

pub mod api;
pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;

use crate::crd::{Scan, ScanStatus, ScanTemplate};
use crate::error::Result;

pub use api::KubeCluster;
pub use memory::MemoryCluster;

/// Cluster operations used by the reconciliation engine.
#[async_trait]
pub trait ScanCluster: Send + Sync {
    /// Fetches a scan, returning `None` if it does not exist.
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<Option<Scan>>;

    /// Fetches a scan template, returning `None` if it does not exist.
    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<ScanTemplate>>;

    /// Fetches the current state of a job, returning `None` if it does not
    /// exist.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Submits a job and returns it as accepted by the cluster.
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Replaces the status of a scan.
    async fn patch_scan_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ScanStatus,
    ) -> Result<()>;
}
