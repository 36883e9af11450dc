//! Pool catalog types
//!
//! Pools are not CRDs: they are loaded from a JSON catalog
//! (`{"items": [...]}`). A pool defines a per-fabric isolation strategy
//! with default values, and the scheduling unit deciding whether those
//! values are pushed at NodeGroup or NetworkNode granularity.

use crate::constants::Fabric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config_strategy: Option<NetworkConfigStrategy>,

    #[serde(default)]
    pub scheduling_config: SchedulingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolList {
    #[serde(default)]
    pub items: Vec<Pool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_end_fabric_strategy: Option<FabricStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_fabric_strategy: Option<FabricStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_fabric_strategy: Option<FabricStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricStrategy {
    pub isolation_type: IsolationType,
    #[serde(default)]
    pub provision_config: ProvisionConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IsolationType {
    #[serde(rename = "VLAN")]
    Vlan,
    #[serde(rename = "BGP")]
    Bgp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_vlan_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_bgp_community: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfig {
    #[serde(default)]
    pub minimum_schedulable_unit: SchedulableUnit,
}

/// Granularity at which a pool's defaults are authoritative
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum SchedulableUnit {
    #[default]
    NodeGroup,
    NetworkNode,
}

impl NetworkConfigStrategy {
    #[must_use]
    pub fn fabric(&self, fabric: Fabric) -> Option<&FabricStrategy> {
        match fabric {
            Fabric::FrontEnd => self.front_end_fabric_strategy.as_ref(),
            Fabric::Accelerator => self.accelerator_fabric_strategy.as_ref(),
            Fabric::Storage => self.storage_fabric_strategy.as_ref(),
        }
    }
}

impl FabricStrategy {
    #[must_use]
    pub fn default_vlan_id(&self) -> Option<i64> {
        self.provision_config.default_vlan_id
    }

    #[must_use]
    pub fn default_bgp_community(&self) -> Option<i64> {
        self.provision_config.default_bgp_community
    }
}

impl Pool {
    /// Strategy for one fabric, if the pool defines one
    #[must_use]
    pub fn fabric_strategy(&self, fabric: Fabric) -> Option<&FabricStrategy> {
        self.network_config_strategy.as_ref().and_then(|s| s.fabric(fabric))
    }

    #[must_use]
    pub fn schedulable_unit(&self) -> SchedulableUnit {
        self.scheduling_config.minimum_schedulable_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_catalog_parses() {
        let json = r#"{
            "items": [
                {
                    "name": "poolA",
                    "networkConfigStrategy": {
                        "frontEndFabricStrategy": {
                            "isolationType": "VLAN",
                            "provisionConfig": {"defaultVlanId": 100}
                        },
                        "acceleratorFabricStrategy": {
                            "isolationType": "BGP",
                            "provisionConfig": {"defaultBgpCommunity": 42}
                        }
                    },
                    "schedulingConfig": {"minimumSchedulableUnit": "NetworkNode"}
                }
            ]
        }"#;
        let list: PoolList = serde_json::from_str(json).unwrap();
        assert_eq!(list.items.len(), 1);
        let pool = &list.items[0];
        assert_eq!(pool.schedulable_unit(), SchedulableUnit::NetworkNode);
        assert_eq!(pool.fabric_strategy(Fabric::FrontEnd).and_then(FabricStrategy::default_vlan_id), Some(100));
        assert_eq!(
            pool.fabric_strategy(Fabric::Accelerator).map(|s| s.isolation_type),
            Some(IsolationType::Bgp)
        );
        assert!(pool.fabric_strategy(Fabric::Storage).is_none(), "Storage strategy should be absent");
    }

    #[test]
    fn test_scheduling_unit_defaults_to_node_group() {
        let pool: Pool = serde_json::from_str(r#"{"name": "p"}"#).unwrap();
        assert_eq!(pool.schedulable_unit(), SchedulableUnit::NodeGroup);
        assert!(pool.network_config_strategy.is_none());
    }
}
