//! Error types for the scan operator.
//!
//! Every error carries a [`ErrorClass`] that decides how the controller
//! requeues the scan. The classification is the only place retry policy is
//! encoded; the engine itself never retries.

/// The result type used throughout scanbox-operator.
pub type Result<T> = std::result::Result<T, Error>;

/// How the invoking infrastructure should treat a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or API failure; retry with backoff.
    Transient,
    /// More than one job owns the scan; keep reporting until an operator
    /// intervenes.
    InvariantViolation,
    /// Deterministically malformed input; retrying cannot help until the scan
    /// or its template changes.
    Permanent,
}

impl ErrorClass {
    /// Returns the metric label for this class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::InvariantViolation => "invariant_violation",
            Self::Permanent => "permanent",
        }
    }
}

/// Errors that can occur while reconciling scans.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A Kubernetes API call failed.
    #[error("kubernetes api error: {message}")]
    Kube {
        /// Description of the failed call.
        message: String,
        /// The underlying client error.
        #[source]
        source: kube::Error,
    },

    /// A cluster call failed outside the Kubernetes client (e.g. an injected
    /// failure in the in-memory cluster).
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of the failure.
        message: String,
    },

    /// Job submission was rejected because a conflicting job already exists.
    #[error("job for scan {scan} already exists")]
    AlreadyExists {
        /// UID of the scan the job was submitted for.
        scan: String,
    },

    /// The upload credential could not be issued.
    #[error("result storage unavailable: {source}")]
    StorageUnavailable {
        /// The underlying storage error.
        #[source]
        source: scanbox_core::Error,
    },

    /// A blocking call did not complete before the pass deadline.
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded {
        /// The call that was cut off.
        operation: &'static str,
    },

    /// The owner index has not finished its initial listing.
    #[error("owner index is not initialized")]
    IndexNotReady,

    /// More than one job names the scan as its owner.
    #[error("scan {scan} owns {} jobs ({}); expected at most one", .jobs.len(), .jobs.join(", "))]
    MultipleJobs {
        /// The scan that owns the jobs.
        scan: String,
        /// Names of the owned jobs.
        jobs: Vec<String>,
    },

    /// The scan template cannot be turned into a job.
    #[error("invalid scan template {template}: {message}")]
    InvalidTemplate {
        /// Template name.
        template: String,
        /// What is wrong with it.
        message: String,
    },

    /// The template's result location does not name a file.
    #[error("invalid result location '{location}': {source}")]
    InvalidResultLocation {
        /// The declared location.
        location: String,
        /// The key construction error.
        #[source]
        source: scanbox_core::Error,
    },

    /// The scan object is missing metadata the operator relies on.
    #[error("invalid scan {scan}: {message}")]
    InvalidScan {
        /// Scan name.
        scan: String,
        /// What is wrong with it.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// An error from scanbox-core.
    #[error("core error: {0}")]
    Core(#[from] scanbox_core::Error),
}

impl Error {
    /// Creates a Kubernetes API error.
    #[must_use]
    pub fn kube(message: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            message: message.into(),
            source,
        }
    }

    /// Creates a cluster error.
    #[must_use]
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }

    /// Creates an invalid template error.
    #[must_use]
    pub fn invalid_template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid scan error.
    #[must_use]
    pub fn invalid_scan(scan: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidScan {
            scan: scan.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies the error for requeue decisions.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::MultipleJobs { .. } => ErrorClass::InvariantViolation,
            Self::InvalidTemplate { .. }
            | Self::InvalidResultLocation { .. }
            | Self::InvalidScan { .. } => ErrorClass::Permanent,
            Self::Core(scanbox_core::Error::Configuration { .. }) => ErrorClass::Permanent,
            Self::Kube { .. }
            | Self::Cluster { .. }
            | Self::AlreadyExists { .. }
            | Self::StorageUnavailable { .. }
            | Self::DeadlineExceeded { .. }
            | Self::IndexNotReady
            | Self::Internal { .. }
            | Self::Core(_) => ErrorClass::Transient,
        }
    }
}
