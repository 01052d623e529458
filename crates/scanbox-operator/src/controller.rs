//! kube-runtime wiring around the reconciliation engine.
//!
//! The controller watches scans, the jobs they own, and scan templates. A job
//! change requeues its owning scan; a template change requeues every scan of
//! that type in the template's namespace, so scans created before their
//! template start as soon as it appears.
//!
//! Requeue policy lives here and only here:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | success | wait for the next change |
//! | lost creation race | requeue after [`RACE_REQUEUE`] |
//! | transient error | requeue after the transient interval |
//! | more than one job | requeue after the invariant interval |
//! | permanent error | wait for the scan or template to change |

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, ResourceExt};
use tokio::time::Instant;

use crate::crd::{Scan, ScanTemplate};
use crate::error::{Error, ErrorClass, Result};
use crate::metrics::OperatorMetrics;
use crate::owner_index::{OwnerIndex, OwnerIndexWriter};
use crate::reconciler::{ReconcileOutcome, Reconciler, ScanKey};

/// Requeue delay after losing a creation race.
pub const RACE_REQUEUE: Duration = Duration::from_secs(1);

/// Shared state handed to every reconciliation.
#[derive(Debug)]
pub struct Context {
    /// The reconciliation engine.
    pub reconciler: Reconciler,
    /// Deadline of one pass.
    pub pass_timeout: Duration,
    /// Requeue interval after a transient failure.
    pub transient_requeue: Duration,
    /// Requeue interval for scans owning more than one job.
    pub invariant_requeue: Duration,
}

/// Reconciles one scan delivered by the controller.
///
/// # Errors
///
/// Returns the engine's error; [`error_policy`] turns it into a requeue.
pub async fn reconcile(scan: Arc<Scan>, ctx: Arc<Context>) -> Result<Action> {
    let key = ScanKey::new(scan.namespace().unwrap_or_default(), scan.name_any());
    let deadline = Instant::now() + ctx.pass_timeout;

    match ctx.reconciler.reconcile(&key, deadline).await? {
        ReconcileOutcome::CreationRaced => Ok(Action::requeue(RACE_REQUEUE)),
        _ => Ok(Action::await_change()),
    }
}

/// Maps a failed pass to a requeue action by error class.
#[must_use]
#[allow(clippy::needless_pass_by_value)] // Signature fixed by kube-runtime.
pub fn error_policy(_scan: Arc<Scan>, error: &Error, ctx: Arc<Context>) -> Action {
    match error.class() {
        ErrorClass::Transient => Action::requeue(ctx.transient_requeue),
        ErrorClass::InvariantViolation => Action::requeue(ctx.invariant_requeue),
        ErrorClass::Permanent => Action::await_change(),
    }
}

/// Returns the scans that use `template`.
#[must_use]
pub fn scans_for_template(store: &Store<Scan>, template: &ScanTemplate) -> Vec<ObjectRef<Scan>> {
    let namespace = template.namespace();
    let name = template.name_any();
    store
        .state()
        .iter()
        .filter(|scan| scan.namespace() == namespace && scan.spec.scan_type == name)
        .map(|scan| ObjectRef::from_obj(scan.as_ref()))
        .collect()
}

fn namespaced_or_all<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Creates the job API for `namespace`, or for all namespaces.
#[must_use]
pub fn job_api(client: Client, namespace: Option<&str>) -> Api<Job> {
    namespaced_or_all(client, namespace)
}

/// Keeps `index` current from the job watch stream until the stream ends.
pub async fn maintain_owner_index(jobs: Api<Job>, index: Arc<OwnerIndex>) {
    let metrics = OperatorMetrics::new();
    let mut writer = OwnerIndexWriter::new(index.clone());
    let mut events = std::pin::pin!(watcher(jobs, watcher::Config::default()).default_backoff());

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if let Err(err) = writer.handle(event) {
                    tracing::error!(error = %err, "failed to update owner index");
                    continue;
                }
                if let Ok(size) = index.len() {
                    metrics.set_owner_index_size(size);
                }
            }
            Err(err) => tracing::warn!(error = %err, "job watch failed"),
        }
    }
}

/// Runs the scan controller until a shutdown signal arrives.
pub async fn run(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scans: Api<Scan> = namespaced_or_all(client.clone(), namespace);
    let templates: Api<ScanTemplate> = namespaced_or_all(client.clone(), namespace);
    let jobs = job_api(client, namespace);

    let controller = Controller::new(scans, watcher::Config::default());
    let store = controller.store();

    controller
        .owns(jobs, watcher::Config::default())
        .watches(templates, watcher::Config::default(), move |template| {
            scans_for_template(&store, &template)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((scan, _)) => tracing::trace!(scan = %scan, "reconciled"),
                Err(err) => tracing::debug!(error = %err, "controller event failed"),
            }
        })
        .await;

    tracing::info!("scan controller stopped");
}
