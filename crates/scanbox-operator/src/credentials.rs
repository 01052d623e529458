//! Upload credential issuer.
//!
//! Each scan instance gets one presigned `PUT` URL for its result key. The URL
//! is the only credential the sidecar receives; it can write that single
//! object and nothing else.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use scanbox_core::{ResultKey, UploadSigner};

use crate::error::{Error, Result};

/// Lifetime of an issued upload URL.
pub const UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(12 * 60 * 60);

/// A presigned upload destination for one scan's result file.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadCredential {
    /// Object key the URL writes to.
    pub key: ResultKey,
    /// Presigned `PUT` URL.
    pub url: String,
    /// How long the URL stays valid.
    pub expires_in: Duration,
}

// The URL embeds a signature; keep it out of logs.
impl fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredential")
            .field("key", &self.key)
            .field("url", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Issues upload credentials against the process-wide result bucket.
#[derive(Clone)]
pub struct CredentialIssuer {
    signer: Arc<dyn UploadSigner>,
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("bucket", &self.signer.bucket())
            .finish()
    }
}

impl CredentialIssuer {
    /// Creates an issuer backed by `signer`.
    #[must_use]
    pub fn new(signer: Arc<dyn UploadSigner>) -> Self {
        Self { signer }
    }

    /// Returns the bucket results are uploaded to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.signer.bucket()
    }

    /// Issues a credential for the result file of scan `scan_uid`.
    ///
    /// `location` is the template's in-container result path; only its final
    /// segment becomes part of the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResultLocation`] if `location` does not name a
    /// file and [`Error::StorageUnavailable`] if signing fails.
    pub async fn issue(&self, scan_uid: &str, location: &str) -> Result<UploadCredential> {
        let key = ResultKey::new(scan_uid, location).map_err(|source| {
            Error::InvalidResultLocation {
                location: location.to_string(),
                source,
            }
        })?;

        let url = self
            .signer
            .presign_put(&key, UPLOAD_URL_EXPIRY)
            .await
            .map_err(|source| Error::StorageUnavailable { source })?;

        tracing::debug!(key = %key, bucket = self.bucket(), "issued upload credential");
        Ok(UploadCredential {
            key,
            url,
            expires_in: UPLOAD_URL_EXPIRY,
        })
    }
}
