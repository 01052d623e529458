//! Error types and result aliases for scanbox.
//!
//! Errors are structured for programmatic handling: callers in the operator
//! decide retry behavior from the variant, never from the message text.

/// The result type used throughout scanbox-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scanbox core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The configured bucket does not exist or is not reachable.
    #[error("bucket '{bucket}' is not available: {message}")]
    BucketUnavailable {
        /// The bucket that was checked.
        bucket: String,
        /// Description of the failure.
        message: String,
    },

    /// Required configuration was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::storage_with_source("failed to sign url", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn bucket_unavailable_names_bucket() {
        let err = Error::BucketUnavailable {
            bucket: "scan-results".into(),
            message: "NoSuchBucket".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("scan-results"));
        assert!(msg.contains("NoSuchBucket"));
    }

    #[test]
    fn configuration_error_display() {
        let err = Error::configuration("missing S3_BUCKET");
        assert_eq!(err.to_string(), "configuration error: missing S3_BUCKET");
    }
}
