//! Upload signer with request tracing.
//!
//! Records every presign request so tests can assert which keys were signed
//! and how often.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scanbox_core::error::{Error, Result};
use scanbox_core::{ResultKey, UploadSigner};

/// Record of one presign request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Key that was signed.
    pub key: String,
    /// Requested validity.
    pub expiry: Duration,
}

/// In-memory signer that records requests.
#[derive(Debug, Clone)]
pub struct TracingSigner {
    bucket: String,
    requests: Arc<Mutex<Vec<SignRequest>>>,
    failing: Arc<Mutex<bool>>,
    latency: Option<Duration>,
}

impl Default for TracingSigner {
    fn default() -> Self {
        Self::new("scan-results")
    }
}

impl TracingSigner {
    /// Creates a signer for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            requests: Arc::default(),
            failing: Arc::default(),
            latency: None,
        }
    }

    /// Creates a signer that delays every request.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded requests.
    pub fn requests(&self) -> Vec<SignRequest> {
        self.requests.lock().expect("lock").clone()
    }

    /// Returns the signed keys in request order.
    pub fn signed_keys(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.key).collect()
    }

    /// Makes every subsequent request fail.
    pub fn inject_failure(&self) {
        *self.failing.lock().expect("lock") = true;
    }

    /// Clears the injected failure.
    pub fn clear_failures(&self) {
        *self.failing.lock().expect("lock") = false;
    }
}

#[async_trait]
impl UploadSigner for TracingSigner {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn presign_put(&self, key: &ResultKey, expiry: Duration) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if *self.failing.lock().expect("lock") {
            return Err(Error::storage(format!("injected failure signing {key}")));
        }

        self.requests.lock().expect("lock").push(SignRequest {
            key: key.as_str().to_string(),
            expiry,
        });
        Ok(format!(
            "https://storage.test/{}/{key}?X-Amz-Expires={}&X-Amz-Signature=test",
            self.bucket,
            expiry.as_secs()
        ))
    }

    async fn verify_bucket(&self) -> Result<()> {
        if *self.failing.lock().expect("lock") {
            return Err(Error::BucketUnavailable {
                bucket: self.bucket.clone(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}
