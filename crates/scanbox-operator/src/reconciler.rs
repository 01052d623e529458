//! Reconciliation engine.
//!
//! One pass takes a scan identity and drives the cluster one step towards the
//! scan's desired state:
//!
//! ```text
//! get scan ──absent──▶ ScanAbsent
//!    │
//! get template ──absent──▶ TemplateAbsent
//!    │
//! owned jobs ─▶ re-read each job
//!    │
//! live jobs ──0──▶ issue credential ─▶ build job ─▶ create ─▶ JobCreated
//!    │                                                └─conflict─▶ CreationRaced
//!    ├──1──▶ project status ─▶ StatusUpdated | StatusUnchanged
//!    └──n──▶ Error::MultipleJobs
//! ```
//!
//! The owner index is fed by its own watch and can lag behind the event that
//! triggered the pass. It only names candidate jobs; their status and
//! existence are read from the cluster before any decision.
//!
//! The engine re-reads everything at the start of each pass and keeps no state
//! between passes, so any number of repeated or concurrent invocations
//! converge on the same result. It never retries; failures are returned to the
//! caller together with their [`ErrorClass`](crate::error::ErrorClass).
//!
//! Every blocking call is bounded by the pass deadline. A call that does not
//! finish in time aborts the pass with [`Error::DeadlineExceeded`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::Instrument;

use scanbox_core::observability::reconcile_span;

use crate::builder::{WorkloadConfig, build_job};
use crate::cluster::ScanCluster;
use crate::credentials::CredentialIssuer;
use crate::crd::{Scan, ScanTemplate};
use crate::error::{Error, Result};
use crate::metrics::{OperatorMetrics, time_reconcile};
use crate::owner_index::{OwnerKey, OwnerLookup};
use crate::status::{needs_write, project};

/// Identity of a scan to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanKey {
    /// Scan namespace.
    pub namespace: String,
    /// Scan name.
    pub name: String,
}

impl ScanKey {
    /// Creates a scan key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Successful result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The scan no longer exists.
    ScanAbsent,
    /// The scan's template does not exist (yet).
    TemplateAbsent {
        /// Name of the missing template.
        template: String,
    },
    /// The scan's job exists and its status is already current.
    StatusUnchanged {
        /// Name of the scan's job.
        job: String,
        /// Current `done` value.
        done: bool,
    },
    /// The scan's job exists and the scan status was updated.
    StatusUpdated {
        /// Name of the scan's job.
        job: String,
        /// New `done` value.
        done: bool,
    },
    /// A job was created for the scan.
    JobCreated {
        /// Name assigned to the new job.
        job: String,
    },
    /// Submission conflicted with an existing job; the next pass sorts it out.
    CreationRaced,
}

impl ReconcileOutcome {
    /// Returns the metric label for this outcome.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ScanAbsent => "scan_absent",
            Self::TemplateAbsent { .. } => "template_absent",
            Self::StatusUnchanged { .. } => "status_unchanged",
            Self::StatusUpdated { .. } => "status_updated",
            Self::JobCreated { .. } => "job_created",
            Self::CreationRaced => "creation_raced",
        }
    }
}

/// Runs `fut` unless the pass deadline passes first.
async fn bounded<T, F>(deadline: Instant, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| Error::DeadlineExceeded { operation })?
}

/// The reconciliation engine.
#[derive(Clone)]
pub struct Reconciler {
    cluster: Arc<dyn ScanCluster>,
    owners: Arc<dyn OwnerLookup>,
    credentials: CredentialIssuer,
    workload: WorkloadConfig,
    metrics: OperatorMetrics,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("credentials", &self.credentials)
            .field("workload", &self.workload)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates an engine over the given capabilities.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ScanCluster>,
        owners: Arc<dyn OwnerLookup>,
        credentials: CredentialIssuer,
        workload: WorkloadConfig,
    ) -> Self {
        Self {
            cluster,
            owners,
            credentials,
            workload,
            metrics: OperatorMetrics::new(),
        }
    }

    /// Reconciles one scan, finishing before `deadline` or failing.
    ///
    /// # Errors
    ///
    /// - [`Error::MultipleJobs`] if the scan owns more than one job
    /// - [`Error::InvalidTemplate`], [`Error::InvalidResultLocation`] or
    ///   [`Error::InvalidScan`] for inputs that cannot produce a job
    /// - [`Error::DeadlineExceeded`] if a call outlives the deadline
    /// - any cluster, owner index or storage error, all transient
    pub async fn reconcile(&self, key: &ScanKey, deadline: Instant) -> Result<ReconcileOutcome> {
        let span = reconcile_span(&key.namespace, &key.name);
        let _timing = time_reconcile(self.metrics);

        let result = self.reconcile_inner(key, deadline).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(outcome) => {
                self.metrics.record_outcome(outcome.as_str());
                tracing::debug!(outcome = outcome.as_str(), "reconcile finished");
            }
            Err(err) => {
                self.metrics.record_error(err.class());
                if let Error::MultipleJobs { .. } = err {
                    tracing::error!(error = %err, "scan ownership invariant violated");
                } else {
                    tracing::warn!(error = %err, class = err.class().as_str(), "reconcile failed");
                }
            }
        });
        result
    }

    async fn reconcile_inner(&self, key: &ScanKey, deadline: Instant) -> Result<ReconcileOutcome> {
        let Some(scan) = bounded(
            deadline,
            "get_scan",
            self.cluster.get_scan(&key.namespace, &key.name),
        )
        .await?
        else {
            tracing::debug!("scan not found");
            return Ok(ReconcileOutcome::ScanAbsent);
        };

        let template_name = scan.spec.scan_type.clone();
        let Some(template) = bounded(
            deadline,
            "get_template",
            self.cluster.get_template(&key.namespace, &template_name),
        )
        .await?
        else {
            tracing::info!(template = %template_name, "scan template not found");
            return Ok(ReconcileOutcome::TemplateAbsent {
                template: template_name,
            });
        };

        let owner = OwnerKey::of_scan(&scan)
            .ok_or_else(|| Error::invalid_scan(key.to_string(), "missing uid"))?;
        let indexed = bounded(deadline, "owned_jobs", self.owners.owned_jobs(&owner)).await?;
        let owned = self.live_jobs(&indexed, deadline).await?;

        match owned.as_slice() {
            [] => self.create(&scan, &owner, &template, deadline).await,
            [job] => self.sync_status(key, &scan, job, deadline).await,
            jobs => Err(Error::MultipleJobs {
                scan: key.to_string(),
                jobs: jobs.iter().map(|job| job.name_any()).collect(),
            }),
        }
    }

    /// Re-reads indexed jobs, dropping those that no longer exist.
    async fn live_jobs(&self, indexed: &[Arc<Job>], deadline: Instant) -> Result<Vec<Job>> {
        let mut live = Vec::with_capacity(indexed.len());
        for job in indexed {
            let namespace = job.namespace().unwrap_or_default();
            let name = job.name_any();
            match bounded(deadline, "get_job", self.cluster.get_job(&namespace, &name)).await? {
                Some(current) => live.push(current),
                None => tracing::debug!(job = %name, "indexed job no longer exists"),
            }
        }
        Ok(live)
    }

    async fn create(
        &self,
        scan: &Scan,
        owner: &OwnerKey,
        template: &ScanTemplate,
        deadline: Instant,
    ) -> Result<ReconcileOutcome> {
        let credential = bounded(
            deadline,
            "issue_credential",
            self.credentials
                .issue(owner.as_str(), &template.spec.extract_results.location),
        )
        .await?;

        let job = build_job(scan, template, &credential.url, &self.workload)?;

        match bounded(deadline, "create_job", self.cluster.create_job(&job)).await {
            Ok(created) => {
                let name = created.name_any();
                self.metrics.record_job_created();
                tracing::info!(job = %name, result_key = %credential.key, "created scan job");
                Ok(ReconcileOutcome::JobCreated { job: name })
            }
            Err(Error::AlreadyExists { .. }) => {
                tracing::info!("job for scan was created concurrently");
                Ok(ReconcileOutcome::CreationRaced)
            }
            Err(err) => Err(err),
        }
    }

    async fn sync_status(
        &self,
        key: &ScanKey,
        scan: &Scan,
        job: &Job,
        deadline: Instant,
    ) -> Result<ReconcileOutcome> {
        let name = job.name_any();
        let projected = project(job);

        if !needs_write(scan.status.as_ref(), projected) {
            return Ok(ReconcileOutcome::StatusUnchanged {
                job: name,
                done: projected.done,
            });
        }

        bounded(
            deadline,
            "patch_scan_status",
            self.cluster
                .patch_scan_status(&key.namespace, &key.name, &projected),
        )
        .await?;
        tracing::info!(job = %name, done = projected.done, "updated scan status");
        Ok(ReconcileOutcome::StatusUpdated {
            job: name,
            done: projected.done,
        })
    }
}
