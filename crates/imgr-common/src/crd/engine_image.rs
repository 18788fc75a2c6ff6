//! EngineImage CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A storage engine container image deployed to the cluster
///
/// Instance managers reference one by name; its image is what the backing
/// pod runs.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "longhorn.io",
    version = "v1beta1",
    kind = "EngineImage",
    plural = "engineimages",
    shortname = "lhei",
    namespaced,
    status = "EngineImageStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EngineImageSpec {
    /// Fully qualified container image reference
    pub image: String,
}

/// Status of an EngineImage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineImageStatus {
    /// Deployment state reported by the image controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
