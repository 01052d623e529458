//! Custom assertion helpers for built jobs.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, PodSpec};

use scanbox_operator::builder::{NAMESPACE_ENV, RESULTS_VOLUME_NAME, SIDECAR_CONTAINER_NAME};

/// Returns the pod spec of a job.
///
/// # Panics
///
/// Panics if the job has no job or pod spec.
pub fn pod_spec(job: &Job) -> &PodSpec {
    job.spec
        .as_ref()
        .expect("job has a spec")
        .template
        .spec
        .as_ref()
        .expect("job has a pod spec")
}

/// Returns the first container of a job.
pub fn primary_container(job: &Job) -> &Container {
    pod_spec(job).containers.first().expect("job has containers")
}

/// Asserts that the primary container runs exactly `expected` as args with no
/// command.
///
/// # Panics
///
/// Panics on mismatch.
pub fn assert_primary_args(job: &Job, expected: &[&str]) {
    let primary = primary_container(job);
    assert_eq!(
        primary.command, None,
        "primary container should have no command"
    );
    let args: Vec<&str> = primary
        .args
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(args, expected, "primary container args");
}

/// Asserts that the last container is the result sidecar uploading
/// `location` to `url` from the primary container.
///
/// # Panics
///
/// Panics on mismatch.
pub fn assert_sidecar(job: &Job, location: &str, url: &str) {
    let pod = pod_spec(job);
    let primary = &pod.containers[0].name;
    let sidecar = pod.containers.last().expect("job has containers");

    assert_eq!(sidecar.name, SIDECAR_CONTAINER_NAME, "last container is the sidecar");
    assert_eq!(
        sidecar.args.as_deref().unwrap_or_default(),
        [
            "--container".to_string(),
            primary.clone(),
            "--file".to_string(),
            location.to_string(),
            "--url".to_string(),
            url.to_string(),
        ],
        "sidecar args"
    );
    assert!(
        sidecar
            .env
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|env| env.name == NAMESPACE_ENV),
        "sidecar receives {NAMESPACE_ENV}"
    );
    assert_mounts_results(sidecar);
}

/// Asserts that a container mounts the shared results volume.
///
/// # Panics
///
/// Panics if the mount is missing.
pub fn assert_mounts_results(container: &Container) {
    assert!(
        container
            .volume_mounts
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|mount| mount.name == RESULTS_VOLUME_NAME),
        "container {} mounts {RESULTS_VOLUME_NAME}",
        container.name
    );
}

/// Returns the upload URL handed to a job's sidecar.
pub fn sidecar_url(job: &Job) -> String {
    let sidecar = pod_spec(job).containers.last().expect("job has containers");
    let args = sidecar.args.as_deref().unwrap_or_default();
    let at = args
        .iter()
        .position(|arg| arg == "--url")
        .expect("sidecar has --url");
    args[at + 1].clone()
}
