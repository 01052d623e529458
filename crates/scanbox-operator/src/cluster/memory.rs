//! In-memory cluster implementation for testing.
//!
//! [`MemoryCluster`] stores scans, templates and jobs in process memory and
//! implements both [`ScanCluster`] and [`OwnerLookup`], so the engine can be
//! driven end to end without an API server.
//!
//! ## Behavior
//!
//! - Job creation is atomic: a job whose controller owner already owns a job
//!   is rejected with [`Error::AlreadyExists`].
//! - `generateName` is honored with a random 5-character suffix.
//! - Failures and delays can be injected per operation.
//! - Job status is never advanced on its own; tests call
//!   [`MemoryCluster::set_job_status`].
//!
//! NOT suitable for production.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use kube::ResourceExt;
use ulid::Ulid;

use super::ScanCluster;
use crate::crd::{Scan, ScanStatus, ScanTemplate};
use crate::error::{Error, Result};
use crate::owner_index::{OwnerKey, OwnerLookup, owner_key};

/// Operations that accept injected failures and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    /// [`ScanCluster::get_scan`].
    GetScan,
    /// [`ScanCluster::get_template`].
    GetTemplate,
    /// [`ScanCluster::get_job`].
    GetJob,
    /// [`ScanCluster::create_job`].
    CreateJob,
    /// [`ScanCluster::patch_scan_status`].
    PatchStatus,
    /// [`OwnerLookup::owned_jobs`].
    OwnedJobs,
}

type ObjectKey = (String, String);

#[derive(Debug, Default)]
struct ClusterState {
    scans: HashMap<ObjectKey, Scan>,
    templates: HashMap<ObjectKey, ScanTemplate>,
    jobs: BTreeMap<ObjectKey, Job>,
    failures: HashSet<ClusterOp>,
    delays: HashMap<ClusterOp, Duration>,
}

/// In-memory cluster for testing.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: RwLock<ClusterState>,
    jobs_created: AtomicUsize,
    status_writes: AtomicUsize,
}

/// Converts a lock poison error to a cluster error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::cluster("memory cluster lock poisoned")
}

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn random_suffix() -> String {
    let id = Ulid::new().to_string().to_ascii_lowercase();
    id[id.len() - 5..].to_string()
}

impl MemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cluster behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stores a scan, assigning a UID if it has none.
    ///
    /// Returns the stored scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan has no namespace or the lock is poisoned.
    pub fn insert_scan(&self, mut scan: Scan) -> Result<Scan> {
        let namespace = scan
            .namespace()
            .ok_or_else(|| Error::invalid_scan(scan.name_any(), "missing namespace"))?;
        if scan.metadata.uid.is_none() {
            scan.metadata.uid = Some(Ulid::new().to_string().to_ascii_lowercase());
        }

        let key = object_key(&namespace, &scan.name_any());
        self.state
            .write()
            .map_err(poison_err)?
            .scans
            .insert(key, scan.clone());
        Ok(scan)
    }

    /// Deletes a scan. Owned jobs are left in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn delete_scan(&self, namespace: &str, name: &str) -> Result<Option<Scan>> {
        Ok(self
            .state
            .write()
            .map_err(poison_err)?
            .scans
            .remove(&object_key(namespace, name)))
    }

    /// Stores a scan template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template has no namespace or the lock is
    /// poisoned.
    pub fn insert_template(&self, template: ScanTemplate) -> Result<()> {
        let namespace = template
            .namespace()
            .ok_or_else(|| Error::invalid_template(template.name_any(), "missing namespace"))?;
        let key = object_key(&namespace, &template.name_any());
        self.state
            .write()
            .map_err(poison_err)?
            .templates
            .insert(key, template);
        Ok(())
    }

    /// Stores a job as-is, bypassing the at-most-one check.
    ///
    /// Used to set up corrupted states.
    ///
    /// # Errors
    ///
    /// Returns an error if the job has no namespace or name, or the lock is
    /// poisoned.
    pub fn insert_job_unchecked(&self, job: Job) -> Result<()> {
        let namespace = job
            .namespace()
            .ok_or_else(|| Error::cluster("job has no namespace"))?;
        let name = job
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::cluster("job has no name"))?;
        self.state
            .write()
            .map_err(poison_err)?
            .jobs
            .insert(object_key(&namespace, &name), job);
        Ok(())
    }

    /// Sets the status of a stored job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job does not exist or the lock is poisoned.
    pub fn set_job_status(&self, namespace: &str, name: &str, status: JobStatus) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let job = state
            .jobs
            .get_mut(&object_key(namespace, name))
            .ok_or_else(|| Error::cluster(format!("job {namespace}/{name} not found")))?;
        job.status = Some(status);
        Ok(())
    }

    /// Returns the stored scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn scan(&self, namespace: &str, name: &str) -> Result<Option<Scan>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.scans.get(&object_key(namespace, name)).cloned())
    }

    /// Deletes a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn delete_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self
            .state
            .write()
            .map_err(poison_err)?
            .jobs
            .remove(&object_key(namespace, name)))
    }

    /// Returns all stored jobs, ordered by namespace and name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.jobs.values().cloned().collect())
    }

    /// Returns the number of jobs accepted through [`ScanCluster::create_job`].
    #[must_use]
    pub fn jobs_created(&self) -> usize {
        self.jobs_created.load(Ordering::SeqCst)
    }

    /// Returns the number of status writes performed.
    #[must_use]
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call of `op` fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn inject_failure(&self, op: ClusterOp) -> Result<()> {
        self.state.write().map_err(poison_err)?.failures.insert(op);
        Ok(())
    }

    /// Delays every subsequent call of `op`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn inject_delay(&self, op: ClusterOp, delay: Duration) -> Result<()> {
        self.state
            .write()
            .map_err(poison_err)?
            .delays
            .insert(op, delay);
        Ok(())
    }

    /// Removes all injected failures and delays.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear_failures(&self) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.failures.clear();
        state.delays.clear();
        Ok(())
    }

    /// Applies any delay and failure injected for `op`.
    async fn enter(&self, op: ClusterOp) -> Result<()> {
        let (delay, fail) = {
            let state = self.state.read().map_err(poison_err)?;
            (state.delays.get(&op).copied(), state.failures.contains(&op))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::cluster(format!("injected failure in {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ScanCluster for MemoryCluster {
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<Option<Scan>> {
        self.enter(ClusterOp::GetScan).await?;
        self.scan(namespace, name)
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<ScanTemplate>> {
        self.enter(ClusterOp::GetTemplate).await?;
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.templates.get(&object_key(namespace, name)).cloned())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.enter(ClusterOp::GetJob).await?;
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.jobs.get(&object_key(namespace, name)).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        self.enter(ClusterOp::CreateJob).await?;

        let namespace = job
            .namespace()
            .ok_or_else(|| Error::cluster("job has no namespace"))?;
        let owner = owner_key(job);

        let mut created = job.clone();
        let name = match (&job.metadata.name, &job.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{}", random_suffix()),
            (None, None) => return Err(Error::cluster("job has neither name nor generateName")),
        };
        created.metadata.name = Some(name.clone());
        created.metadata.uid = Some(Ulid::new().to_string().to_ascii_lowercase());

        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(owner) = owner {
            if state.jobs.values().any(|j| owner_key(j).as_ref() == Some(&owner)) {
                return Err(Error::AlreadyExists {
                    scan: owner.to_string(),
                });
            }
        }
        let key = object_key(&namespace, &name);
        if state.jobs.contains_key(&key) {
            return Err(Error::cluster(format!("job {namespace}/{name} already exists")));
        }
        state.jobs.insert(key, created.clone());
        drop(state);

        self.jobs_created.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn patch_scan_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ScanStatus,
    ) -> Result<()> {
        self.enter(ClusterOp::PatchStatus).await?;

        let mut state = self.state.write().map_err(poison_err)?;
        let scan = state
            .scans
            .get_mut(&object_key(namespace, name))
            .ok_or_else(|| Error::cluster(format!("scan {namespace}/{name} not found")))?;
        scan.status = Some(*status);
        drop(state);

        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OwnerLookup for MemoryCluster {
    async fn owned_jobs(&self, owner: &OwnerKey) -> Result<Vec<Arc<Job>>> {
        self.enter(ClusterOp::OwnedJobs).await?;
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .jobs
            .values()
            .filter(|job| owner_key(job).as_ref() == Some(owner))
            .cloned()
            .map(Arc::new)
            .collect())
    }
}
