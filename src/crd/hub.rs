use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hub is the cluster-singleton CR. Pods and secrets created by the scheduler
/// are owner-referenced to it so an uninstall garbage-collects everything.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hub.example.com",
    version = "v1alpha1",
    kind = "Hub",
    plural = "hubs",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HubSpec {}
