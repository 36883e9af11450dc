//! NetworkNode CRD
//!
//! One record per compute host. Each fabric section names the SwitchPort
//! records the host is cabled to and the VLAN/mode they should carry.

use crate::constants::Fabric;
use crate::switch_port::default_noop_vlan;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "NetworkNode",
    namespaced,
    status = "NetworkNodeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_end_fabric: Option<FrontEndFabric>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_fabric: Option<MultiPortFabric>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_fabric: Option<MultiPortFabric>,
}

/// Front-end fabric: a single port with full trunk control
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrontEndFabric {
    /// SwitchPort record name
    #[serde(default)]
    pub switch_port: String,
    #[serde(default)]
    pub vlan_id: i64,
    #[serde(default)]
    pub mode: String,
    #[serde(default = "default_noop_vlan")]
    pub native_vlan: i64,
    /// `None` = don't manage, empty list = clear all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_groups: Option<Vec<String>>,
}

impl Default for FrontEndFabric {
    fn default() -> Self {
        Self {
            switch_port: String::new(),
            vlan_id: 0,
            mode: String::new(),
            native_vlan: default_noop_vlan(),
            trunk_groups: None,
        }
    }
}

/// Accelerator and storage fabrics: several ports sharing one VLAN and mode
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiPortFabric {
    #[serde(default)]
    pub switch_ports: Vec<String>,
    #[serde(default)]
    pub vlan_id: i64,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeStatus {
    #[serde(default)]
    pub front_end_fabric_status: FrontEndFabricStatus,
    #[serde(default)]
    pub accelerator_fabric_status: MultiPortFabricStatus,
    #[serde(default)]
    pub storage_fabric_status: MultiPortFabricStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrontEndFabricStatus {
    #[serde(default)]
    pub last_observed_vlan_id: i64,
    #[serde(default)]
    pub last_observed_mode: String,
    #[serde(default)]
    pub last_observed_native_vlan: i64,
    #[serde(default)]
    pub last_observed_trunk_groups: Vec<String>,
    /// "ready/total"
    #[serde(default)]
    pub readiness: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiPortFabricStatus {
    #[serde(default)]
    pub switch_ports: Vec<FabricSwitchPortStatus>,
    #[serde(default)]
    pub readiness: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricSwitchPortStatus {
    pub switch_port: String,
    #[serde(default)]
    pub last_observed_vlan_id: i64,
    #[serde(default)]
    pub last_observed_mode: String,
}

impl NetworkNodeSpec {
    /// Desired VLAN of a fabric, if the fabric is configured
    #[must_use]
    pub fn fabric_vlan(&self, fabric: Fabric) -> Option<i64> {
        match fabric {
            Fabric::FrontEnd => self.front_end_fabric.as_ref().map(|f| f.vlan_id),
            Fabric::Accelerator => self.accelerator_fabric.as_ref().map(|f| f.vlan_id),
            Fabric::Storage => self.storage_fabric.as_ref().map(|f| f.vlan_id),
        }
    }

    /// Sets the desired VLAN of a fabric. Returns false when the fabric is absent.
    pub fn set_fabric_vlan(&mut self, fabric: Fabric, vlan_id: i64) -> bool {
        let slot = match fabric {
            Fabric::FrontEnd => self.front_end_fabric.as_mut().map(|f| &mut f.vlan_id),
            Fabric::Accelerator => self.accelerator_fabric.as_mut().map(|f| &mut f.vlan_id),
            Fabric::Storage => self.storage_fabric.as_mut().map(|f| &mut f.vlan_id),
        };
        match slot {
            Some(v) => {
                *v = vlan_id;
                true
            }
            None => false,
        }
    }

    /// Number of switch ports a fabric is cabled to
    #[must_use]
    pub fn fabric_port_count(&self, fabric: Fabric) -> usize {
        match fabric {
            Fabric::FrontEnd => usize::from(self.front_end_fabric.is_some()),
            Fabric::Accelerator => self.accelerator_fabric.as_ref().map_or(0, |f| f.switch_ports.len()),
            Fabric::Storage => self.storage_fabric.as_ref().map_or(0, |f| f.switch_ports.len()),
        }
    }
}

impl NetworkNodeStatus {
    /// Resets the observed values of one fabric
    pub fn clear_fabric(&mut self, fabric: Fabric) {
        match fabric {
            Fabric::FrontEnd => self.front_end_fabric_status = FrontEndFabricStatus::default(),
            Fabric::Accelerator => self.accelerator_fabric_status = MultiPortFabricStatus::default(),
            Fabric::Storage => self.storage_fabric_status = MultiPortFabricStatus::default(),
        }
    }

    /// Observed VLANs per switch port of a fabric
    #[must_use]
    pub fn observed_fabric_vlans(&self, fabric: Fabric, spec: &NetworkNodeSpec) -> Vec<(String, i64)> {
        match fabric {
            Fabric::FrontEnd => spec
                .front_end_fabric
                .as_ref()
                .map(|f| vec![(f.switch_port.clone(), self.front_end_fabric_status.last_observed_vlan_id)])
                .unwrap_or_default(),
            Fabric::Accelerator => self
                .accelerator_fabric_status
                .switch_ports
                .iter()
                .map(|p| (p.switch_port.clone(), p.last_observed_vlan_id))
                .collect(),
            Fabric::Storage => self
                .storage_fabric_status
                .switch_ports
                .iter()
                .map(|p| (p.switch_port.clone(), p.last_observed_vlan_id))
                .collect(),
        }
    }
}
