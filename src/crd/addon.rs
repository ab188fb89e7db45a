use k8s_openapi::api::core::v1::Container;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task_kind::Selector;

/// Addon is a catalog entry naming the container image that implements a
/// task kind.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hub.example.com",
    version = "v1alpha1",
    kind = "Addon",
    plural = "addons",
    namespaced,
    printcolumn = r#"{"name":"Task", "type":"string", "jsonPath":".spec.task"}"#,
    printcolumn = r#"{"name":"Capability", "type":"string", "jsonPath":".spec.capability"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Task kind served by this addon.
    #[serde(default)]
    pub task: String,

    /// Capability advertised to selectors.
    #[serde(default)]
    pub capability: String,

    /// Main container template.
    pub container: Container,

    /// Extension selectors evaluated when a task does not name extensions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Selector>,
}

/// Extension is a catalog entry declaring an auxiliary sidecar container
/// attached to a specific addon.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hub.example.com",
    version = "v1alpha1",
    kind = "Extension",
    plural = "extensions",
    namespaced,
    printcolumn = r#"{"name":"Addon", "type":"string", "jsonPath":".spec.addon"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Addon this extension attaches to.
    #[serde(default)]
    pub addon: String,

    /// Capability advertised to selectors.
    #[serde(default)]
    pub capability: String,

    /// Sidecar container template.
    pub container: Container,
}
