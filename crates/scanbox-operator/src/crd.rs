//! Custom resources consumed by the operator.
//!
//! - [`Scan`]: one request to run a scan type with a list of parameters
//! - [`ScanTemplate`]: how a scan type is executed and where its result file is
//!
//! Both are namespaced. A scan refers to its template by name through
//! `spec.scanType`; the template must live in the scan's namespace.

use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the scanbox resources.
pub const API_GROUP: &str = "execution.scanbox.io";
/// API version of the scanbox resources.
pub const API_VERSION: &str = "v1";

/// Desired state of a scan.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "execution.scanbox.io",
    version = "v1",
    kind = "Scan",
    namespaced,
    status = "ScanStatus",
    shortname = "scan",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.scanType"}"#,
    printcolumn = r#"{"name":"Done","type":"boolean","jsonPath":".status.done"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScanSpec {
    /// Name of the [`ScanTemplate`] describing how to run this scan.
    pub scan_type: String,
    /// Parameters appended to the template's command, in order.
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// Observed state of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScanStatus {
    /// True once the scan's job reported a successful completion.
    #[serde(default)]
    pub done: bool,
}

/// How to execute one scan type.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "execution.scanbox.io",
    version = "v1",
    kind = "ScanTemplate",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ScanTemplateSpec {
    /// Job shape used for every scan of this type.
    pub job_template: JobTemplateSpec,
    /// Where the scanner writes its result file.
    pub extract_results: ExtractResults,
}

/// Result-extraction descriptor of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractResults {
    /// Absolute path of the result file inside the scanner container.
    pub location: String,
}

impl Scan {
    /// Returns `namespace/name` for logs and error messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}

/// Returns the `apiVersion` string recorded in owner references to scans.
#[must_use]
pub fn scan_api_version() -> String {
    Scan::api_version(&()).into_owned()
}

/// Returns the kind recorded in owner references to scans.
#[must_use]
pub fn scan_kind() -> String {
    Scan::kind(&()).into_owned()
}
