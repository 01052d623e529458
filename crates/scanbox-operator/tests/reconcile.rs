//! Integration tests for the reconciliation engine against the in-memory
//! cluster.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use kube::ResourceExt;
use tokio::time::Instant;

use scanbox_operator::cluster::ScanCluster;
use scanbox_operator::cluster::memory::ClusterOp;
use scanbox_operator::crd::ScanStatus;
use scanbox_operator::credentials::UPLOAD_URL_EXPIRY;
use scanbox_operator::{Error, ErrorClass, ReconcileOutcome};
use scanbox_test_utils::{
    ScanFactory, TemplateFactory, TestCluster, TracingSigner, assert_mounts_results,
    assert_primary_args, assert_sidecar, init_test_logging, job_status, key_of, owned_job,
    pod_spec, sidecar_url,
};

fn nmap_scan(name: &str) -> scanbox_operator::crd::Scan {
    ScanFactory::new("security", name, "nmap")
        .parameters(&["-p", "443", "example.com"])
        .build()
}

/// First pass creates one job with merged args, the sidecar and the upload URL.
#[tokio::test]
async fn first_pass_creates_job() {
    init_test_logging();
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let outcome = ctx.reconcile(&scan).await.expect("reconcile");
    let ReconcileOutcome::JobCreated { job } = outcome else {
        panic!("expected JobCreated, got {outcome:?}");
    };
    assert!(job.starts_with("weekly-"));

    let jobs = ctx.jobs_of(&scan);
    assert_eq!(jobs.len(), 1);
    let created = &jobs[0];
    assert_eq!(created.name_any(), job);
    assert_eq!(created.namespace().as_deref(), Some("security"));

    assert_primary_args(
        created,
        &["nmap", "-oX", TemplateFactory::NMAP_RESULT, "-p", "443", "example.com"],
    );
    assert_mounts_results(&pod_spec(created).containers[0]);

    let url = sidecar_url(created);
    assert_sidecar(created, TemplateFactory::NMAP_RESULT, &url);

    let uid = scan.uid().unwrap();
    assert_eq!(ctx.signer.signed_keys(), vec![format!("scan-{uid}/nmap.xml")]);
    assert_eq!(ctx.signer.requests()[0].expiry, UPLOAD_URL_EXPIRY);
    assert!(url.contains(&format!("scan-{uid}/nmap.xml")));
    assert!(url.contains("X-Amz-Expires=43200"));

    // Creation does not write status in the same pass.
    assert_eq!(ctx.cluster.status_writes(), 0);
}

/// Repeated passes without external change create one job and leave status alone.
#[tokio::test]
async fn repeated_passes_are_idempotent() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.reconcile(&scan).await.unwrap();
    let second = ctx.reconcile(&scan).await.unwrap();
    let third = ctx.reconcile(&scan).await.unwrap();

    assert!(matches!(second, ReconcileOutcome::StatusUnchanged { done: false, .. }));
    assert_eq!(second, third);
    assert_eq!(ctx.cluster.jobs_created(), 1);
    assert_eq!(ctx.signer.requests().len(), 1);
    assert_eq!(ctx.cluster.status_writes(), 0);
    assert_eq!(ctx.current(&scan).status, None);
}

/// A succeeded job marks the scan done exactly once.
#[tokio::test]
async fn success_is_projected_once() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let ReconcileOutcome::JobCreated { job } = ctx.reconcile(&scan).await.unwrap() else {
        panic!("expected a job");
    };

    ctx.cluster
        .set_job_status("security", &job, job_status(0, 2))
        .unwrap();
    assert!(matches!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged { done: false, .. }
    ));

    ctx.cluster
        .set_job_status("security", &job, job_status(1, 2))
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

/// Concurrent passes for the same scan accept exactly one job.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_passes_create_at_most_one_job() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));
    let key = key_of(&scan);

    let passes: Vec<_> = (0..16)
        .map(|_| {
            let reconciler = ctx.reconciler.clone();
            let key = key.clone();
            tokio::spawn(async move {
                reconciler
                    .reconcile(&key, Instant::now() + Duration::from_secs(5))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for pass in passes {
        match pass.await.unwrap().expect("no pass fails") {
            ReconcileOutcome::JobCreated { .. } => created += 1,
            ReconcileOutcome::CreationRaced | ReconcileOutcome::StatusUnchanged { .. } => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ctx.jobs_of(&scan).len(), 1);

    // Losers converge on the winner in their next pass.
    assert!(matches!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::StatusUnchanged { .. }
    ));
}

/// Each scan instance gets its own job and result key.
#[tokio::test]
async fn scans_are_isolated_by_uid() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let first = ctx.add_scan(nmap_scan("first"));
    let second = ctx.add_scan(nmap_scan("second"));

    ctx.reconcile(&first).await.unwrap();
    ctx.reconcile(&second).await.unwrap();

    assert_eq!(ctx.jobs_of(&first).len(), 1);
    assert_eq!(ctx.jobs_of(&second).len(), 1);
    let keys = ctx.signer.signed_keys();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

/// A missing scan or template ends the pass quietly.
#[tokio::test]
async fn absent_objects_are_benign() {
    let ctx = TestCluster::new();

    let ghost = nmap_scan("ghost");
    ctx.cluster.insert_scan(ghost.clone()).unwrap();
    ctx.cluster.delete_scan("security", "ghost").unwrap();
    assert_eq!(
        ctx.reconcile(&ghost).await.unwrap(),
        ReconcileOutcome::ScanAbsent
    );

    let scan = ctx.add_scan(nmap_scan("weekly"));
    assert_eq!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::TemplateAbsent {
            template: "nmap".into()
        }
    );
    assert_eq!(ctx.cluster.jobs_created(), 0);

    // The template appearing later unblocks the scan.
    ctx.add_template(TemplateFactory::nmap("security"));
    assert!(matches!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::JobCreated { .. }
    ));
}

/// A template in another namespace does not satisfy the scan.
#[tokio::test]
async fn template_must_share_the_namespace() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("other"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    assert!(matches!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::TemplateAbsent { .. }
    ));
}

/// Fetch failures are transient errors, unlike absence.
#[tokio::test]
async fn fetch_failures_are_transient() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    for op in [ClusterOp::GetScan, ClusterOp::GetTemplate, ClusterOp::OwnedJobs] {
        ctx.cluster.inject_failure(op).unwrap();
        let err = ctx.reconcile(&scan).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient, "{op:?}");
        ctx.cluster.clear_failures().unwrap();
    }
    assert_eq!(ctx.cluster.jobs_created(), 0);
}

/// No job is created without an upload URL.
#[tokio::test]
async fn storage_failure_creates_no_job() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.signer.inject_failure();
    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert!(matches!(err, Error::StorageUnavailable { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(ctx.jobs_of(&scan).is_empty());

    ctx.signer.clear_failures();
    assert!(matches!(
        ctx.reconcile(&scan).await.unwrap(),
        ReconcileOutcome::JobCreated { .. }
    ));
}

/// Submission and status-write failures are transient and leave no partial state.
#[tokio::test]
async fn write_failures_are_transient() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.cluster.inject_failure(ClusterOp::CreateJob).unwrap();
    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(ctx.jobs_of(&scan).is_empty());
    ctx.cluster.clear_failures().unwrap();

    let ReconcileOutcome::JobCreated { job } = ctx.reconcile(&scan).await.unwrap() else {
        panic!("expected a job");
    };
    ctx.cluster
        .set_job_status("security", &job, job_status(1, 0))
        .unwrap();

    ctx.cluster.inject_failure(ClusterOp::PatchStatus).unwrap();
    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(ctx.current(&scan).status, None);
}

/// More than one owned job is reported and never repaired.
#[tokio::test]
async fn multiple_jobs_are_an_invariant_violation() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.cluster
        .insert_job_unchecked(owned_job(&scan, "weekly-aaaaa"))
        .unwrap();
    ctx.cluster
        .insert_job_unchecked(owned_job(&scan, "weekly-bbbbb"))
        .unwrap();

    let err = ctx.reconcile(&scan).await.unwrap_err();
    let Error::MultipleJobs { ref jobs, .. } = err else {
        panic!("expected MultipleJobs, got {err:?}");
    };
    assert_eq!(jobs, &vec!["weekly-aaaaa".to_string(), "weekly-bbbbb".to_string()]);
    assert_eq!(err.class(), ErrorClass::InvariantViolation);

    // Still two jobs, nothing created or written.
    assert_eq!(ctx.jobs_of(&scan).len(), 2);
    assert_eq!(ctx.cluster.jobs_created(), 0);
    assert_eq!(ctx.cluster.status_writes(), 0);
}

/// A template without containers is a permanent error and creates nothing.
#[tokio::test]
async fn empty_template_is_invalid() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::with_containers(
        "security",
        "nmap",
        Vec::new(),
        TemplateFactory::NMAP_RESULT,
    ));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTemplate { .. }));
    assert_eq!(err.class(), ErrorClass::Permanent);
    assert_eq!(ctx.cluster.jobs_created(), 0);
}

/// A result location without a filename is a permanent error.
#[tokio::test]
async fn result_location_must_name_a_file() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::with_containers(
        "security",
        "nmap",
        vec![TemplateFactory::container("nmap", &["nmap"])],
        "/",
    ));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let err = ctx.reconcile(&scan).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResultLocation { .. }));
    assert_eq!(err.class(), ErrorClass::Permanent);
}

/// Calls that outlive the pass deadline abort with a transient timeout.
#[tokio::test]
async fn slow_calls_hit_the_deadline() {
    let ctx = TestCluster::new();
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.cluster
        .inject_delay(ClusterOp::CreateJob, Duration::from_secs(10))
        .unwrap();
    let err = ctx
        .reconciler
        .reconcile(&key_of(&scan), Instant::now() + Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded { operation: "create_job" }));
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(ctx.jobs_of(&scan).is_empty());
}

/// A slow signer is bounded by the same deadline.
#[tokio::test]
async fn slow_signer_hits_the_deadline() {
    let ctx = TestCluster::with_signer(TracingSigner::with_latency(Duration::from_secs(10)));
    ctx.add_template(TemplateFactory::nmap("security"));
    let scan = ctx.add_scan(nmap_scan("weekly"));

    let err = ctx
        .reconciler
        .reconcile(&key_of(&scan), Instant::now() + Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DeadlineExceeded {
            operation: "issue_credential"
        }
    ));
}

/// The template stored in the cluster is not changed by building a job from it.
#[tokio::test]
async fn template_is_not_mutated() {
    let ctx = TestCluster::new();
    let template = TemplateFactory::with_containers(
        "security",
        "nmap",
        vec![TemplateFactory::container_with_mount(
            "nmap",
            &["nmap"],
            "/etc/nmap",
        )],
        TemplateFactory::NMAP_RESULT,
    );
    ctx.add_template(template.clone());
    let scan = ctx.add_scan(nmap_scan("weekly"));

    ctx.reconcile(&scan).await.unwrap();

    let stored = ctx
        .cluster
        .get_template("security", "nmap")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, template);

    let job = &ctx.jobs_of(&scan)[0];
    let mounts = pod_spec(job).containers[0].volume_mounts.as_ref().unwrap();
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts[0].mount_path, "/etc/nmap");
}
