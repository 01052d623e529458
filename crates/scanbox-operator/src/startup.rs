//! Operator startup.
//!
//! Startup either produces a fully initialized [`Operator`] or a typed
//! [`StartupError`]. The steps run in order and any failure aborts:
//!
//! 1. connect to result storage and verify the bucket,
//! 2. connect to the Kubernetes API,
//! 3. list all jobs and build the owner index.

use std::sync::Arc;

use kube::Client;
use kube::api::ListParams;
use scanbox_core::{S3UploadSigner, UploadSigner};

use crate::cluster::KubeCluster;
use crate::config::OperatorConfig;
use crate::controller::{self, Context};
use crate::credentials::CredentialIssuer;
use crate::metrics::OperatorMetrics;
use crate::owner_index::OwnerIndex;
use crate::reconciler::Reconciler;

/// Errors that prevent the operator from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(#[source] crate::error::Error),

    /// Result storage is unreachable or the bucket does not exist.
    #[error("result storage unavailable: {0}")]
    Storage(#[source] scanbox_core::Error),

    /// The Kubernetes client could not be created.
    #[error("failed to create kubernetes client: {0}")]
    Client(#[source] kube::Error),

    /// The metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[source] metrics_exporter_prometheus::BuildError),

    /// The initial job listing failed.
    #[error("failed to initialize owner index: {0}")]
    OwnerIndex(#[source] crate::error::Error),
}

/// A fully initialized operator, ready to run.
pub struct Operator {
    client: Client,
    index: Arc<OwnerIndex>,
    context: Arc<Context>,
    watch_namespace: Option<String>,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("watch_namespace", &self.watch_namespace)
            .finish_non_exhaustive()
    }
}

impl Operator {
    /// Initializes all process-wide state.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] naming the step that failed.
    pub async fn bootstrap(config: OperatorConfig) -> Result<Self, StartupError> {
        let signer = S3UploadSigner::connect(&config.storage)
            .await
            .map_err(StartupError::Storage)?;
        let signer: Arc<dyn UploadSigner> = Arc::new(signer);

        let client = Client::try_default().await.map_err(StartupError::Client)?;

        let namespace = config.watch_namespace.as_deref();
        let jobs = controller::job_api(client.clone(), namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                StartupError::OwnerIndex(crate::error::Error::kube("failed to list jobs", e))
            })?;

        let index = Arc::new(OwnerIndex::new());
        index.rebuild(jobs.items).map_err(StartupError::OwnerIndex)?;
        let size = index.len().map_err(StartupError::OwnerIndex)?;
        OperatorMetrics::new().set_owner_index_size(size);
        tracing::info!(jobs = size, "owner index initialized");

        let cluster = Arc::new(KubeCluster::new(client.clone(), index.clone()));
        let reconciler = Reconciler::new(
            cluster,
            index.clone(),
            CredentialIssuer::new(signer),
            config.workload,
        );

        Ok(Self {
            client,
            index,
            context: Arc::new(Context {
                reconciler,
                pass_timeout: config.pass_timeout,
                transient_requeue: config.transient_requeue,
                invariant_requeue: config.invariant_requeue,
            }),
            watch_namespace: config.watch_namespace,
        })
    }

    /// Runs index maintenance and the controller until shutdown.
    pub async fn run(self) {
        let namespace = self.watch_namespace.as_deref();
        let jobs = controller::job_api(self.client.clone(), namespace);
        let maintenance = tokio::spawn(controller::maintain_owner_index(jobs, self.index.clone()));

        tracing::info!(namespace = namespace.unwrap_or("*"), "starting scan controller");
        controller::run(self.client, self.context, namespace).await;

        maintenance.abort();
    }
}
