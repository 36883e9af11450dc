//! NodeGroupToPoolMapping CRD
//!
//! Source of truth for which Pool a NodeGroup should belong to. Changes
//! drive the Pool Manager's migration state machine.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "NodeGroupToPoolMapping",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupToPoolMappingSpec {
    /// NodeGroup record name
    pub node_group: String,
    /// Target pool name (empty = remove from any pool)
    #[serde(default)]
    pub pool: String,
}
