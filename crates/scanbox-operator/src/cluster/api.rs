//! Kubernetes API implementation of [`ScanCluster`].

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use super::ScanCluster;
use crate::crd::{Scan, ScanStatus, ScanTemplate};
use crate::error::{Error, Result};
use crate::owner_index::{OwnerIndex, owner_key};

const HTTP_CONFLICT: u16 = 409;

/// Cluster access through the Kubernetes API server.
///
/// Jobs accepted by the API server are recorded in the owner index straight
/// away, so the next pass for the same scan sees them even if the job watch
/// has not delivered the event yet.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    index: Arc<OwnerIndex>,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Creates a cluster handle that records created jobs in `index`.
    #[must_use]
    pub fn new(client: Client, index: Arc<OwnerIndex>) -> Self {
        Self { client, index }
    }

    fn scans(&self, namespace: &str) -> Api<Scan> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == HTTP_CONFLICT)
}

/// Maps a failed job submission to an engine error.
///
/// Jobs use `generateName`, so a conflict is a collision on the generated
/// name rather than proof that another pass won. The engine only requeues
/// shortly after it.
fn submission_error(job: &Job, err: kube::Error) -> Error {
    if is_conflict(&err) {
        return Error::AlreadyExists {
            scan: owner_key(job).map(|owner| owner.to_string()).unwrap_or_default(),
        };
    }
    let namespace = job.namespace().unwrap_or_default();
    Error::kube(format!("failed to create job in {namespace}"), err)
}

/// Records a job accepted by the API server in the owner index.
///
/// The job exists either way, and the job watch indexes it if this fails.
fn record_created(index: &OwnerIndex, created: &Job) {
    if let Err(err) = index.apply(created.clone()) {
        tracing::warn!(job = %created.name_any(), error = %err, "failed to index created job");
    }
}

#[async_trait]
impl ScanCluster for KubeCluster {
    async fn get_scan(&self, namespace: &str, name: &str) -> Result<Option<Scan>> {
        self.scans(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(format!("failed to get scan {namespace}/{name}"), e))
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<ScanTemplate>> {
        Api::<ScanTemplate>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(format!("failed to get scan template {namespace}/{name}"), e))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Api::<Job>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(format!("failed to get job {namespace}/{name}"), e))
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let namespace = job.namespace().unwrap_or_default();
        let created = Api::<Job>::namespaced(self.client.clone(), &namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| submission_error(job, e))?;

        record_created(&self.index, &created);
        Ok(created)
    }

    async fn patch_scan_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ScanStatus,
    ) -> Result<()> {
        let patch = Patch::Merge(json!({ "status": status }));
        self.scans(namespace)
            .patch_status(name, &PatchParams::default(), &patch)
            .await
            .map(|_| ())
            .map_err(|e| Error::kube(format!("failed to patch status of scan {namespace}/{name}"), e))
    }
}
