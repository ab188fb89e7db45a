use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TaskKind is a logical task type. It maps to one or more addons through
/// selectors and declares dependencies on other kinds.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hub.example.com",
    version = "v1alpha1",
    kind = "TaskKind",
    plural = "taskkinds",
    namespaced,
    printcolumn = r#"{"name":"Priority", "type":"string", "jsonPath":".spec.priority"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TaskKindSpec {
    /// Addon selectors, evaluated in order; first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addon: Vec<Selector>,

    /// Priority class name for launched pods.
    #[serde(default)]
    pub priority: String,

    /// Kinds this kind depends on (direct declaration only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl TaskKind {
    /// The kind declares the named dependency.
    pub fn has_dep(&self, kind: &str) -> bool {
        self.spec.dependencies.iter().any(|d| d == kind)
    }
}

/// Selector targets catalog entries by name or capability.
///
/// `match` format: `[namespace/][kind:]name[=value]`. The only recognized
/// kind is `tag`. `name` and `capability` may contain the literal `$*`,
/// substituted with the matched tag name.
///
/// Example:
/// ```yaml
/// - match: "tag:Language="
///   capability: "$*-analysis"
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, rename = "match")]
    pub matched: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capability: String,
}
