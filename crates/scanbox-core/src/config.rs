//! Environment-driven configuration.
//!
//! All settings are read once at process startup. Missing required values and
//! unparseable optional values are configuration errors; the process does not
//! start with partial settings.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::Redacted;

/// Environment variable holding the object store endpoint.
pub const ENV_S3_ENDPOINT: &str = "S3_ENDPOINT";
/// Environment variable holding the object store access key.
pub const ENV_S3_ACCESS_KEY: &str = "S3_ACCESS_KEY";
/// Environment variable holding the object store secret key.
pub const ENV_S3_SECRET_KEY: &str = "S3_SECRET_KEY";
/// Environment variable holding the result bucket name.
pub const ENV_S3_BUCKET: &str = "S3_BUCKET";
/// Environment variable holding the object store region.
pub const ENV_S3_REGION: &str = "S3_REGION";
/// Environment variable toggling TLS for endpoints given without a scheme.
pub const ENV_S3_USE_SSL: &str = "S3_USE_SSL";

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the result object store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Endpoint, either a bare `host[:port]` or a full URL.
    pub endpoint: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: Redacted<String>,
    /// Bucket receiving scan results.
    pub bucket: String,
    /// Signing region.
    pub region: String,
    /// Whether bare endpoints are reached over HTTPS.
    pub use_ssl: bool,
}

impl StorageConfig {
    /// Reads storage settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a required variable is missing or
    /// `S3_USE_SSL` is not a boolean.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads storage settings through an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// See [`StorageConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| required_value(key, lookup(key));

        Ok(Self {
            endpoint: required(ENV_S3_ENDPOINT)?,
            access_key: required(ENV_S3_ACCESS_KEY)?,
            secret_key: Redacted::new(required(ENV_S3_SECRET_KEY)?),
            bucket: required(ENV_S3_BUCKET)?,
            region: non_empty(lookup(ENV_S3_REGION)).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            use_ssl: parse_bool(ENV_S3_USE_SSL, lookup(ENV_S3_USE_SSL), true)?,
        })
    }

    /// Returns the endpoint as a URL, adding a scheme if none was given.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            return self.endpoint.clone();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }
}

/// Reads an optional environment variable, treating empty values as unset.
#[must_use]
pub fn optional_env(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

/// Reads an optional duration in whole seconds.
///
/// # Errors
///
/// Returns `Error::Configuration` if the value is set but not a positive integer.
pub fn secs_env(key: &str, default: Duration) -> Result<Duration> {
    parse_secs(key, std::env::var(key).ok(), default)
}

/// Reads an optional port number.
///
/// # Errors
///
/// Returns `Error::Configuration` if the value is set but not a valid port.
pub fn port_env(key: &str, default: u16) -> Result<u16> {
    match optional_env(key) {
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| Error::configuration(format!("invalid {key}: '{value}'"))),
        None => Ok(default),
    }
}

fn required_value(key: &str, value: Option<String>) -> Result<String> {
    non_empty(value).ok_or_else(|| Error::configuration(format!("missing {key}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = non_empty(value) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration(format!("invalid {key}: '{value}'"))),
    }
}

fn parse_secs(key: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    let Some(value) = non_empty(value) else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::configuration(format!("invalid {key}: '{value}'"))),
    }
}
