//! # scanbox-core
//!
//! Core abstractions shared by the scanbox operator crates.
//!
//! This crate provides:
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Upload Signing**: The storage seam that issues presigned upload URLs
//! - **Result Keys**: Deterministic object keys for scan result artifacts
//! - **Configuration**: Environment-driven settings read once at startup
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use scanbox_core::prelude::*;
//!
//! let key = ResultKey::new("abc123", "/home/securecodebox/report.json").unwrap();
//! assert_eq!(key.as_str(), "scan-abc123/report.json");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod observability;
pub mod storage;
pub mod storage_keys;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::StorageConfig;
    pub use crate::error::{Error, Result};
    pub use crate::storage::{MemorySigner, S3UploadSigner, UploadSigner};
    pub use crate::storage_keys::ResultKey;
}

// Re-export key types at crate root for ergonomics
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use observability::{LogFormat, Redacted, init_logging};
pub use storage::{MemorySigner, S3UploadSigner, UploadSigner};
pub use storage_keys::ResultKey;
