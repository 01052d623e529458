//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create scans, templates and a wired test
//! cluster with sensible defaults.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tokio::time::Instant;

use scanbox_operator::builder::WorkloadConfig;
use scanbox_operator::cluster::MemoryCluster;
use scanbox_operator::credentials::CredentialIssuer;
use scanbox_operator::crd::{ExtractResults, Scan, ScanSpec, ScanTemplate, ScanTemplateSpec};
use scanbox_operator::owner_index::{OwnerIndex, OwnerLookup};
use scanbox_operator::reconciler::{ReconcileOutcome, Reconciler, ScanKey};

use crate::signer::TracingSigner;

/// Default pass deadline used by [`TestCluster::reconcile`].
pub const TEST_PASS_TIMEOUT: Duration = Duration::from_secs(5);

/// Converts string slices to owned strings.
pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Builder for test scans.
#[derive(Debug, Clone)]
pub struct ScanFactory {
    namespace: String,
    name: String,
    scan_type: String,
    parameters: Vec<String>,
    uid: Option<String>,
}

impl ScanFactory {
    /// Starts a scan of `scan_type` named `name` in `namespace`.
    pub fn new(namespace: &str, name: &str, scan_type: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            scan_type: scan_type.to_string(),
            parameters: Vec::new(),
            uid: None,
        }
    }

    /// Sets the scan parameters.
    #[must_use]
    pub fn parameters(mut self, parameters: &[&str]) -> Self {
        self.parameters = strings(parameters);
        self
    }

    /// Sets a fixed UID.
    #[must_use]
    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    /// Builds the scan.
    pub fn build(self) -> Scan {
        let mut scan = Scan::new(
            &self.name,
            ScanSpec {
                scan_type: self.scan_type,
                parameters: self.parameters,
            },
        );
        scan.metadata.namespace = Some(self.namespace);
        scan.metadata.uid = self.uid;
        scan
    }
}

/// Factory for scan templates.
pub struct TemplateFactory;

impl TemplateFactory {
    /// Result location used by the default templates.
    pub const NMAP_RESULT: &'static str = "/home/securecodebox/nmap.xml";

    /// An nmap template with one container whose command writes XML output.
    pub fn nmap(namespace: &str) -> ScanTemplate {
        Self::with_containers(
            namespace,
            "nmap",
            vec![Self::container(
                "nmap",
                &["nmap", "-oX", Self::NMAP_RESULT],
            )],
            Self::NMAP_RESULT,
        )
    }

    /// A template with the given containers and result location.
    pub fn with_containers(
        namespace: &str,
        name: &str,
        containers: Vec<Container>,
        location: &str,
    ) -> ScanTemplate {
        let mut template = ScanTemplate::new(
            name,
            ScanTemplateSpec {
                job_template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(BTreeMap::from([(
                            "scanbox.io/scan-type".to_string(),
                            name.to_string(),
                        )])),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(JobSpec {
                        backoff_limit: Some(3),
                        template: PodTemplateSpec {
                            metadata: None,
                            spec: Some(PodSpec {
                                containers,
                                restart_policy: Some("Never".to_string()),
                                ..PodSpec::default()
                            }),
                        },
                        ..JobSpec::default()
                    }),
                },
                extract_results: ExtractResults {
                    location: location.to_string(),
                },
            },
        );
        template.metadata.namespace = Some(namespace.to_string());
        template
    }

    /// A scanner container with the given command.
    pub fn container(name: &str, command: &[&str]) -> Container {
        Container {
            name: name.to_string(),
            image: Some(format!("scanbox/{name}:latest")),
            command: Some(strings(command)),
            ..Container::default()
        }
    }

    /// A scanner container with one pre-existing volume mount.
    pub fn container_with_mount(name: &str, command: &[&str], mount: &str) -> Container {
        Container {
            volume_mounts: Some(vec![VolumeMount {
                name: "config".to_string(),
                mount_path: mount.to_string(),
                ..VolumeMount::default()
            }]),
            ..Self::container(name, command)
        }
    }
}

/// Builds a job owned by `scan`, as if created by an earlier pass.
pub fn owned_job(scan: &Scan, name: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: scan.namespace(),
            owner_references: scan.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        ..Job::default()
    }
}

/// Job status with the given completion counters.
pub fn job_status(succeeded: i32, failed: i32) -> JobStatus {
    JobStatus {
        succeeded: Some(succeeded),
        failed: Some(failed),
        ..JobStatus::default()
    }
}

/// In-memory cluster wired to an engine with a tracing signer.
pub struct TestCluster {
    /// The cluster state.
    pub cluster: Arc<MemoryCluster>,
    /// The signer behind the credential issuer.
    pub signer: TracingSigner,
    /// The engine under test.
    pub reconciler: Reconciler,
}

impl TestCluster {
    /// Creates an empty cluster with default workload settings.
    pub fn new() -> Self {
        Self::with_signer(TracingSigner::default())
    }

    /// Creates an empty cluster using `signer`.
    pub fn with_signer(signer: TracingSigner) -> Self {
        let cluster = MemoryCluster::shared();
        Self::wired(cluster.clone(), cluster, signer)
    }

    /// Creates an empty cluster whose engine looks up owned jobs in `index`.
    ///
    /// Nothing writes the index on its own; tests apply jobs to it the way
    /// the job submission layer and the job watch do.
    pub fn indexed(index: Arc<OwnerIndex>) -> Self {
        Self::wired(MemoryCluster::shared(), index, TracingSigner::default())
    }

    fn wired(
        cluster: Arc<MemoryCluster>,
        owners: Arc<dyn OwnerLookup>,
        signer: TracingSigner,
    ) -> Self {
        let reconciler = Reconciler::new(
            cluster.clone(),
            owners,
            CredentialIssuer::new(Arc::new(signer.clone())),
            WorkloadConfig::default(),
        );
        Self {
            cluster,
            signer,
            reconciler,
        }
    }

    /// Returns the stored job named `name` in the namespace of `scan`.
    pub fn job(&self, scan: &Scan, name: &str) -> Job {
        self.jobs_of(scan)
            .into_iter()
            .find(|job| job.name_any() == name)
            .expect("job exists")
    }

    /// Stores a template.
    pub fn add_template(&self, template: ScanTemplate) {
        self.cluster.insert_template(template).expect("insert template");
    }

    /// Stores a scan and returns it with its assigned UID.
    pub fn add_scan(&self, scan: Scan) -> Scan {
        self.cluster.insert_scan(scan).expect("insert scan")
    }

    /// Runs one pass for `scan` with the default deadline.
    pub async fn reconcile(&self, scan: &Scan) -> scanbox_operator::Result<ReconcileOutcome> {
        self.reconciler
            .reconcile(&key_of(scan), Instant::now() + TEST_PASS_TIMEOUT)
            .await
    }

    /// Returns the jobs owned by `scan`.
    pub fn jobs_of(&self, scan: &Scan) -> Vec<Job> {
        let uid = scan.uid();
        self.cluster
            .jobs()
            .expect("list jobs")
            .into_iter()
            .filter(|job| {
                job.owner_references()
                    .iter()
                    .any(|owner| Some(&owner.uid) == uid.as_ref())
            })
            .collect()
    }

    /// Returns the stored scan.
    pub fn current(&self, scan: &Scan) -> Scan {
        self.cluster
            .scan(&scan.namespace().expect("namespace"), &scan.name_any())
            .expect("read scan")
            .expect("scan exists")
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the reconcile key of `scan`.
pub fn key_of(scan: &Scan) -> ScanKey {
    ScanKey::new(scan.namespace().unwrap_or_default(), scan.name_any())
}
