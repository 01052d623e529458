//! Workload builder: turns a scan and its template into a job.
//!
//! The builder is a pure function. It deep-copies the template's job spec and
//! then augments the copy:
//!
//! 1. an `emptyDir` results volume is appended to the pod's volumes,
//! 2. the volume is mounted into the first (primary) container,
//! 3. the primary container's `command` and the scan's parameters are merged
//!    into its `args`,
//! 4. a result-extraction sidecar sharing the volume is appended last.
//!
//! Nothing present in the template is removed except the primary container's
//! own `command`/`args`, which are replaced by the merged argument list.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::{Scan, ScanTemplate};
use crate::error::{Error, Result};

/// Name of the shared results volume.
pub const RESULTS_VOLUME_NAME: &str = "scan-results";
/// Name of the injected result-extraction container.
pub const SIDECAR_CONTAINER_NAME: &str = "lurcher";
/// Image of the result-extraction container unless overridden.
pub const DEFAULT_SIDECAR_IMAGE: &str = "docker.pkg.github.com/j12934/securecodebox/lurcher:b943cf1";
/// Mount path of the results volume unless overridden.
pub const DEFAULT_RESULTS_MOUNT_PATH: &str = "/home/securecodebox/";
/// Environment variable carrying the pod namespace into the sidecar.
pub const NAMESPACE_ENV: &str = "NAMESPACE";

const IMAGE_PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Process-wide settings for built workloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Image of the result-extraction sidecar.
    pub sidecar_image: String,
    /// Path the results volume is mounted at in both containers.
    pub results_mount_path: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            sidecar_image: DEFAULT_SIDECAR_IMAGE.to_string(),
            results_mount_path: DEFAULT_RESULTS_MOUNT_PATH.to_string(),
        }
    }
}

/// Merges a template command with scan parameters into one argument list.
///
/// The command comes first, in order, followed by the parameters in order.
#[must_use]
pub fn merge_args(command: Option<&[String]>, parameters: &[String]) -> Vec<String> {
    command
        .unwrap_or_default()
        .iter()
        .chain(parameters)
        .cloned()
        .collect()
}

/// Builds the job that executes `scan` according to `template`.
///
/// `upload_url` is handed to the sidecar verbatim and must already be
/// presigned for this scan's result key.
///
/// # Errors
///
/// Returns [`Error::InvalidTemplate`] if the template has no job spec, no pod
/// spec or no containers, and [`Error::InvalidScan`] if the scan lacks the
/// name, namespace or UID needed to own the job.
pub fn build_job(
    scan: &Scan,
    template: &ScanTemplate,
    upload_url: &str,
    config: &WorkloadConfig,
) -> Result<Job> {
    let template_name = template.name_any();
    let scan_name = scan
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::invalid_scan(scan.display_name(), "missing name"))?;
    let namespace = scan
        .namespace()
        .ok_or_else(|| Error::invalid_scan(scan.display_name(), "missing namespace"))?;
    let owner = scan
        .controller_owner_ref(&())
        .ok_or_else(|| Error::invalid_scan(scan.display_name(), "missing uid"))?;

    let job_template = &template.spec.job_template;
    let mut job_spec: JobSpec = job_template
        .spec
        .clone()
        .ok_or_else(|| Error::invalid_template(&template_name, "jobTemplate has no spec"))?;

    let pod = job_spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| Error::invalid_template(&template_name, "job template has no pod spec"))?;

    inject_results_volume(pod);
    let primary_name = augment_primary(pod, &scan.spec.parameters, config)
        .ok_or_else(|| Error::invalid_template(&template_name, "pod spec has no containers"))?;

    pod.containers.push(sidecar(
        &primary_name,
        &template.spec.extract_results.location,
        upload_url,
        config,
    ));

    let template_meta = job_template.metadata.clone().unwrap_or_default();
    Ok(Job {
        metadata: ObjectMeta {
            generate_name: Some(format!("{scan_name}-")),
            namespace: Some(namespace),
            labels: template_meta.labels,
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(job_spec),
        status: None,
    })
}

fn inject_results_volume(pod: &mut PodSpec) {
    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: RESULTS_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    });
}

fn results_mount(config: &WorkloadConfig) -> VolumeMount {
    VolumeMount {
        name: RESULTS_VOLUME_NAME.to_string(),
        mount_path: config.results_mount_path.clone(),
        ..VolumeMount::default()
    }
}

/// Mounts the results volume and merges arguments on the first container.
///
/// Returns the container's name, or `None` if there is no container.
fn augment_primary(
    pod: &mut PodSpec,
    parameters: &[String],
    config: &WorkloadConfig,
) -> Option<String> {
    let primary = pod.containers.first_mut()?;

    primary
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(results_mount(config));

    let args = merge_args(primary.command.as_deref(), parameters);
    primary.args = Some(args);
    primary.command = None;

    Some(primary.name.clone())
}

fn sidecar(primary: &str, location: &str, upload_url: &str, config: &WorkloadConfig) -> Container {
    Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(config.sidecar_image.clone()),
        image_pull_policy: Some(IMAGE_PULL_IF_NOT_PRESENT.to_string()),
        args: Some(vec![
            "--container".to_string(),
            primary.to_string(),
            "--file".to_string(),
            location.to_string(),
            "--url".to_string(),
            upload_url.to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: NAMESPACE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..ObjectFieldSelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        }]),
        volume_mounts: Some(vec![results_mount(config)]),
        ..Container::default()
    }
}
