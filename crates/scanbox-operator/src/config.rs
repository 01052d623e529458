//! Operator configuration from the environment.

use std::time::Duration;

use scanbox_core::LogFormat;
use scanbox_core::StorageConfig;
use scanbox_core::config::{optional_env, port_env, secs_env};

use crate::builder::WorkloadConfig;
use crate::error::Result;

/// Overrides the sidecar image.
pub const ENV_SIDECAR_IMAGE: &str = "SCANBOX_SIDECAR_IMAGE";
/// Overrides the results mount path.
pub const ENV_RESULTS_MOUNT_PATH: &str = "SCANBOX_RESULTS_MOUNT_PATH";
/// Deadline of one reconciliation pass, in seconds.
pub const ENV_PASS_TIMEOUT_SECS: &str = "SCANBOX_PASS_TIMEOUT_SECS";
/// Requeue interval for scans owning more than one job, in seconds.
pub const ENV_INVARIANT_REQUEUE_SECS: &str = "SCANBOX_INVARIANT_REQUEUE_SECS";
/// Restricts the operator to one namespace.
pub const ENV_WATCH_NAMESPACE: &str = "SCANBOX_WATCH_NAMESPACE";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "SCANBOX_LOG_FORMAT";
/// Port of the health and metrics server.
pub const ENV_PORT: &str = "PORT";

const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INVARIANT_REQUEUE: Duration = Duration::from_secs(300);
const DEFAULT_TRANSIENT_REQUEUE: Duration = Duration::from_secs(15);
const DEFAULT_PORT: u16 = 8080;

/// Complete operator configuration.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Result storage connection.
    pub storage: StorageConfig,
    /// Settings for built jobs.
    pub workload: WorkloadConfig,
    /// Deadline of one reconciliation pass.
    pub pass_timeout: Duration,
    /// Requeue interval after a transient failure.
    pub transient_requeue: Duration,
    /// Requeue interval for scans owning more than one job.
    pub invariant_requeue: Duration,
    /// Namespace to watch, or `None` for all namespaces.
    pub watch_namespace: Option<String>,
    /// Port of the health and metrics server.
    pub port: u16,
    /// Log output format.
    pub log_format: LogFormat,
}

impl OperatorConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required variable is missing or an
    /// optional one cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let defaults = WorkloadConfig::default();
        Ok(Self {
            storage: StorageConfig::from_env()?,
            workload: WorkloadConfig {
                sidecar_image: optional_env(ENV_SIDECAR_IMAGE).unwrap_or(defaults.sidecar_image),
                results_mount_path: optional_env(ENV_RESULTS_MOUNT_PATH)
                    .unwrap_or(defaults.results_mount_path),
            },
            pass_timeout: secs_env(ENV_PASS_TIMEOUT_SECS, DEFAULT_PASS_TIMEOUT)?,
            transient_requeue: DEFAULT_TRANSIENT_REQUEUE,
            invariant_requeue: secs_env(ENV_INVARIANT_REQUEUE_SECS, DEFAULT_INVARIANT_REQUEUE)?,
            watch_namespace: optional_env(ENV_WATCH_NAMESPACE),
            port: port_env(ENV_PORT, DEFAULT_PORT)?,
            log_format: LogFormat::from_name(optional_env(ENV_LOG_FORMAT).as_deref()),
        })
    }
}
