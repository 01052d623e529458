//! # scanbox-operator
//!
//! Kubernetes operator that runs security scans as jobs.
//!
//! A [`Scan`](crd::Scan) names a [`ScanTemplate`](crd::ScanTemplate) and a list
//! of parameters. For each scan the operator creates exactly one job from the
//! template, with the parameters appended to the scanner command and a sidecar
//! that uploads the result file to object storage through a presigned URL. When
//! the job succeeds the scan is marked done.
//!
//! ## Modules
//!
//! - [`owner_index`]: scan UID to owned jobs
//! - [`builder`]: pure scan + template to job transformation
//! - [`credentials`]: presigned upload URLs per scan
//! - [`status`]: job completion to scan status
//! - [`reconciler`]: the per-scan state machine
//! - [`cluster`]: cluster access (Kubernetes API or in memory)
//! - [`controller`]: kube-runtime wiring and requeue policy
//! - [`startup`]: typed process initialization
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scanbox_core::MemorySigner;
//! use scanbox_operator::prelude::*;
//!
//! let cluster = MemoryCluster::shared();
//! let reconciler = Reconciler::new(
//!     cluster.clone(),
//!     cluster,
//!     CredentialIssuer::new(Arc::new(MemorySigner::default())),
//!     WorkloadConfig::default(),
//! );
//! # let _ = reconciler;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod owner_index;
pub mod reconciler;
pub mod startup;
pub mod status;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::{WorkloadConfig, build_job, merge_args};
    pub use crate::cluster::{MemoryCluster, ScanCluster};
    pub use crate::crd::{Scan, ScanSpec, ScanStatus, ScanTemplate, ScanTemplateSpec};
    pub use crate::credentials::{CredentialIssuer, UploadCredential};
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::owner_index::{OwnerIndex, OwnerKey, OwnerLookup};
    pub use crate::reconciler::{ReconcileOutcome, Reconciler, ScanKey};
}

pub use error::{Error, ErrorClass, Result};
pub use reconciler::{ReconcileOutcome, Reconciler, ScanKey};
