//! Upload signing abstraction for scan result storage.
//!
//! The operator never moves result bytes itself. It hands each scan's sidecar a
//! presigned, write-only URL and the sidecar uploads directly to the bucket.
//! This module defines the signing contract and its backends:
//!
//! - [`S3UploadSigner`]: any S3-compatible store (AWS, MinIO, Ceph RGW)
//! - [`MemorySigner`]: deterministic mock URLs for tests
//!
//! Signers are bound to a single bucket at construction and are read-only
//! afterwards, so one instance is shared across all reconciliations.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use object_store::ObjectStore;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::storage_keys::ResultKey;

/// Issues presigned upload URLs for a single bucket.
#[async_trait]
pub trait UploadSigner: Send + Sync + 'static {
    /// Returns the bucket this signer issues URLs for.
    fn bucket(&self) -> &str;

    /// Generates a presigned `PUT` URL for `key`, valid for `expiry`.
    ///
    /// Returns `Error::Storage` if the store cannot be reached or the URL
    /// cannot be signed.
    async fn presign_put(&self, key: &ResultKey, expiry: Duration) -> Result<String>;

    /// Checks that the bucket exists and is reachable.
    ///
    /// Returns `Error::BucketUnavailable` otherwise.
    async fn verify_bucket(&self) -> Result<()>;
}

/// Signer for S3-compatible object stores.
#[derive(Debug)]
pub struct S3UploadSigner {
    store: AmazonS3,
    bucket: String,
}

impl S3UploadSigner {
    /// Builds a signer from storage configuration without contacting the store.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the client cannot be constructed from the
    /// given settings.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(config.endpoint_url())
            .with_access_key_id(config.access_key.as_str())
            .with_secret_access_key(config.secret_key.expose().as_str())
            .with_region(config.region.as_str())
            .with_bucket_name(config.bucket.as_str())
            .with_allow_http(!config.use_ssl)
            .build()
            .map_err(|e| Error::storage_with_source("failed to build S3 client", e))?;

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
        })
    }

    /// Builds a signer and verifies the bucket before returning it.
    ///
    /// This is the startup path: an unreachable store or a missing bucket is
    /// reported as an error instead of producing a degraded signer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` for client construction failures and
    /// `Error::BucketUnavailable` if the bucket check fails.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let signer = Self::from_config(config)?;
        signer.verify_bucket().await?;
        tracing::info!(
            endpoint = %config.endpoint_url(),
            bucket = %signer.bucket,
            "connected to result storage"
        );
        Ok(signer)
    }
}

#[async_trait]
impl UploadSigner for S3UploadSigner {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn presign_put(&self, key: &ResultKey, expiry: Duration) -> Result<String> {
        let path = Path::from(key.as_str());
        let url = self
            .store
            .signed_url(Method::PUT, &path, expiry)
            .await
            .map_err(|e| Error::storage_with_source(format!("failed to presign upload for {key}"), e))?;
        Ok(url.to_string())
    }

    async fn verify_bucket(&self) -> Result<()> {
        // Listing the bucket root fails for both unreachable endpoints and
        // missing buckets.
        self.store
            .list_with_delimiter(None)
            .await
            .map(|_| ())
            .map_err(|e| Error::BucketUnavailable {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })
    }
}

/// In-memory signer for testing.
///
/// Produces deterministic mock URLs and never fails. Not suitable for production.
#[derive(Debug, Clone)]
pub struct MemorySigner {
    bucket: String,
}

impl MemorySigner {
    /// Creates a signer for the given bucket name.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }
}

impl Default for MemorySigner {
    fn default() -> Self {
        Self::new("scan-results")
    }
}

#[async_trait]
impl UploadSigner for MemorySigner {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn presign_put(&self, key: &ResultKey, expiry: Duration) -> Result<String> {
        Ok(format!(
            "memory://{}/{key}?method=PUT&expires={}&signature=mock",
            self.bucket,
            expiry.as_secs()
        ))
    }

    async fn verify_bucket(&self) -> Result<()> {
        Ok(())
    }
}
