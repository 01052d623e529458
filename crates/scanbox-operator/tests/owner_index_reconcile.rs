//! Integration tests for the reconciliation engine reading owned jobs from
//! the shared owner index, the way the operator runs against a cluster.
//!
//! The index is written here the way the job submission layer (`apply` after
//! create) and the job watch (`OwnerIndexWriter`) write it in production.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use kube::runtime::watcher;

use scanbox_operator::cluster::memory::ClusterOp;
use scanbox_operator::crd::{Scan, ScanStatus};
use scanbox_operator::owner_index::{OwnerIndex, OwnerIndexWriter};
use scanbox_operator::{Error, ErrorClass, ReconcileOutcome};
use scanbox_test_utils::{ScanFactory, TemplateFactory, TestCluster, init_test_logging, job_status};

fn nmap_scan(name: &str) -> Scan {
    ScanFactory::new("security", name, "nmap")
        .parameters(&["example.com"])
        .build()
}

/// Index initialized empty, with an nmap template and one scan stored.
fn indexed_cluster() -> (TestCluster, Arc<OwnerIndex>, Scan) {
    let index = Arc::new(OwnerIndex::new());
    index.rebuild(Vec::new()).unwrap();
    let ctx = TestCluster::indexed(index.clone());
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));
    (ctx, index, scan)
}

async fn create_and_record(ctx: &TestCluster, index: &OwnerIndex, scan: &Scan) -> String {
    let ReconcileOutcome::JobCreated { job } = ctx.reconcile(scan).await.unwrap() else {
        panic!("expected a job");
    };
    index.apply(ctx.job(scan, &job)).unwrap();
    job
}

/// Lookups before the first rebuild fail transiently and create nothing.
#[tokio::test]
async fn unready_index_is_transient() {
    init_test_logging();
    let ctx = TestCluster::indexed(Arc::new(OwnerIndex::new()));
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert!(matches!(err, Error::IndexNotReady));
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(ctx.cluster.jobs_created(), 0);
}

/// A created job recorded in the index makes the next pass a no-op.
#[tokio::test]
async fn created_job_is_seen_once_recorded() {
    let (ctx, index, scan) = indexed_cluster();

    let ReconcileOutcome::JobCreated { job } = ctx.reconcile(&scan).await.unwrap() else {
        panic!("expected a job");
    };

    // Not yet indexed: the second submission is rejected, not duplicated.
    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::CreationRaced
    );

    index.apply(ctx.job(&scan, &job)).unwrap();
    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged { job, done: false }
    );
    assert_eq!(ctx.cluster.jobs_created(), 1);
    assert_eq!(ctx.jobs_of(&scan).len(), 1);
}

/// A job created while the watch re-lists stays visible after the swap.
#[tokio::test]
async fn job_created_during_relist_survives_it() {
    let (ctx, index, scan) = indexed_cluster();
    let mut writer = OwnerIndexWriter::new(index.clone());

    writer.handle(watcher::Event::Init).unwrap();
    let job = create_and_record(&ctx, &index, &scan).await;
    // The list snapshot predates the job.
    writer.handle(watcher::Event::InitDone).unwrap();

    assert_eq!(index.len().unwrap(), 1);
    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged { job, done: false }
    );
    assert_eq!(ctx.cluster.jobs_created(), 1);
}

/// Completion is projected from the job as stored, not the indexed copy.
#[tokio::test]
async fn stale_indexed_status_is_reread() {
    let (ctx, index, scan) = indexed_cluster();
    let job = create_and_record(&ctx, &index, &scan).await;

    // The job finishes; the index still holds the copy from creation.
    ctx.cluster
        .set_job_status("security", &job, job_status(1, 0))
        .unwrap();

    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUpdated {
            job: job.clone(),
            done: true
        }
    );
    assert_eq!(ctx.current(&scan).status, Some(ScanStatus { done: true }));

    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged { job, done: true }
    );
    assert_eq!(ctx.cluster.status_writes(), 1);
}

/// An indexed job that no longer exists does not count as owned.
#[tokio::test]
async fn deleted_indexed_job_is_ignored() {
    let (ctx, index, scan) = indexed_cluster();
    let old = create_and_record(&ctx, &index, &scan).await;

    ctx.cluster.delete_job("security", &old).unwrap();
    let fresh = create_and_record(&ctx, &index, &scan).await;
    assert_ne!(fresh, old);

    // The index still names both jobs; only the live one is considered.
    assert_eq!(index.len().unwrap(), 2);
    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged {
            job: fresh,
            done: false
        }
    );
}

/// Failing to re-read an indexed job is transient.
#[tokio::test]
async fn job_read_failure_is_transient() {
    let (ctx, index, scan) = indexed_cluster();
    create_and_record(&ctx, &index, &scan).await;

    ctx.cluster.inject_failure(ClusterOp::GetJob).unwrap();
    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(ctx.cluster.jobs_created(), 1);
}
