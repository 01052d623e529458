//! Typed storage keys for scan result artifacts.
//!
//! Every scan instance uploads its result file under a prefix derived from the
//! scan's unique identity, so repeated scans with the same name never overwrite
//! each other's results.
//!
//! # Path Format
//!
//! `scan-{scan_uid}/{result_filename}`
//!
//! The filename is the last path segment of the template's declared result
//! location, e.g. `/home/securecodebox/report.json` becomes `report.json`.
//!
//! # Example
//!
//! ```rust
//! use scanbox_core::storage_keys::ResultKey;
//!
//! let key = ResultKey::new("abc123", "report.json").unwrap();
//! assert_eq!(key.as_ref(), "scan-abc123/report.json");
//! ```

use crate::error::{Error, Result};

/// A typed key for a scan's result object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey(String);

impl ResultKey {
    /// Creates the result key for a scan instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the scan identity is empty or the
    /// result location has no filename component.
    pub fn new(scan_uid: &str, result_location: &str) -> Result<Self> {
        if scan_uid.is_empty() {
            return Err(Error::InvalidInput(
                "scan identity cannot be empty".to_string(),
            ));
        }

        let filename = result_filename(result_location).ok_or_else(|| {
            Error::InvalidInput(format!(
                "result location '{result_location}' has no filename"
            ))
        })?;

        Ok(Self(format!("scan-{scan_uid}/{filename}")))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResultKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the last non-empty path segment of a result location.
///
/// Trailing slashes are ignored. Returns `None` for empty locations and for
/// locations consisting only of separators or dot segments.
#[must_use]
pub fn result_filename(location: &str) -> Option<&str> {
    let name = location.trim_end_matches('/').rsplit('/').next()?;
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}
