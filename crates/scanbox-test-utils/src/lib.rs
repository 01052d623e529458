//! Shared test utilities for scanbox integration tests.
//!
//! This crate provides:
//! - [`TracingSigner`]: Upload signer that records every request
//! - [`TestCluster`]: In-memory cluster wired to an engine
//! - Factory functions for scans, templates and containers
//! - Assertion helpers for built jobs
//!
//! # Example
//!
//! ```rust,ignore
//! use scanbox_test_utils::{TestCluster, ScanFactory, TemplateFactory};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestCluster::new();
//!     ctx.add_template(TemplateFactory::nmap("default"));
//!     let scan = ctx.add_scan(ScanFactory::new("default", "weekly", "nmap").build());
//!     // ... reconcile ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod signer;

pub use assertions::*;
pub use fixtures::*;
pub use signer::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("scanbox_operator=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
