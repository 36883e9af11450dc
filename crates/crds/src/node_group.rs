//! NodeGroup CRD
//!
//! A set of NetworkNodes and the leaf switches they touch. The `pool` and
//! `maintenance` labels hold the current pool and the migration lock.

use crate::constants::Fabric;
use crate::switch::BgpConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "NodeGroup",
    namespaced,
    status = "NodeGroupStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// NetworkNode record names
    #[serde(default)]
    pub network_nodes: Vec<String>,

    /// Switch record names per fabric
    #[serde(default)]
    pub front_end_leaf_switches: Vec<String>,
    #[serde(default)]
    pub accelerator_leaf_switches: Vec<String>,
    #[serde(default)]
    pub storage_leaf_switches: Vec<String>,

    /// Group-level policy, used only when the pool's scheduling unit is NodeGroup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_end_fabric_config: Option<FabricConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_fabric_config: Option<FabricConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_fabric_config: Option<FabricConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_conf: Option<VlanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_conf: Option<BgpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VlanConfig {
    /// `-1` = no-op
    pub vlan_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_end_fabric_status: Option<FabricConfigStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_fabric_status: Option<FabricConfigStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_fabric_status: Option<FabricConfigStatus>,

    #[serde(default)]
    pub network_nodes_count: i64,
    #[serde(default)]
    pub front_end_switch_count: i64,
    #[serde(default)]
    pub acc_switch_count: i64,
    #[serde(default)]
    pub storage_switch_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricConfigStatus {
    #[serde(default)]
    pub vlan_config_status: VlanConfigStatus,
    #[serde(default)]
    pub bgp_config_status: BgpConfigStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VlanConfigStatus {
    /// "ready/total" over member NetworkNodes
    #[serde(default)]
    pub readiness: String,
    #[serde(default)]
    pub ready: bool,
    /// Last VLAN that every member fully converged to
    #[serde(default)]
    pub last_observed_ready_vlan: i64,
    #[serde(default)]
    pub readiness_by_network_node: Vec<NetworkNodeVlanReadiness>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeVlanReadiness {
    pub network_node_name: String,
    /// switch port -> observed VLAN
    #[serde(default)]
    pub last_observed_vlan_id: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BgpConfigStatus {
    /// "ready/total" over leaf switches
    #[serde(default)]
    pub readiness: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub last_observed_ready_bgp: i64,
    #[serde(default)]
    pub switch_bgp_conf_status: Vec<SwitchBgpConfStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBgpConfStatus {
    pub switch_fqdn: String,
    #[serde(default)]
    pub last_observed_bgp_community: i64,
}

impl NodeGroupSpec {
    #[must_use]
    pub fn leaf_switches(&self, fabric: Fabric) -> &[String] {
        match fabric {
            Fabric::FrontEnd => &self.front_end_leaf_switches,
            Fabric::Accelerator => &self.accelerator_leaf_switches,
            Fabric::Storage => &self.storage_leaf_switches,
        }
    }

    #[must_use]
    pub fn fabric_config(&self, fabric: Fabric) -> Option<&FabricConfig> {
        match fabric {
            Fabric::FrontEnd => self.front_end_fabric_config.as_ref(),
            Fabric::Accelerator => self.accelerator_fabric_config.as_ref(),
            Fabric::Storage => self.storage_fabric_config.as_ref(),
        }
    }

    pub fn fabric_config_mut(&mut self, fabric: Fabric) -> &mut Option<FabricConfig> {
        match fabric {
            Fabric::FrontEnd => &mut self.front_end_fabric_config,
            Fabric::Accelerator => &mut self.accelerator_fabric_config,
            Fabric::Storage => &mut self.storage_fabric_config,
        }
    }
}

impl NodeGroupStatus {
    #[must_use]
    pub fn fabric_status(&self, fabric: Fabric) -> Option<&FabricConfigStatus> {
        match fabric {
            Fabric::FrontEnd => self.front_end_fabric_status.as_ref(),
            Fabric::Accelerator => self.accelerator_fabric_status.as_ref(),
            Fabric::Storage => self.storage_fabric_status.as_ref(),
        }
    }

    pub fn fabric_status_mut(&mut self, fabric: Fabric) -> &mut Option<FabricConfigStatus> {
        match fabric {
            Fabric::FrontEnd => &mut self.front_end_fabric_status,
            Fabric::Accelerator => &mut self.accelerator_fabric_status,
            Fabric::Storage => &mut self.storage_fabric_status,
        }
    }
}
