//! Test utilities for unit testing reconcilers
//!
//! Builders for every record kind plus [`TestEnv`], which wires a
//! reconciler, status reporter and pool manager to in-memory stores and
//! one shared `MockSwitchClient`.

#[cfg(test)]
use crate::config::ControllerConfig;
#[cfg(test)]
use crate::devices_manager::{DevicesAccessManager, MockClientFactory};
#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::events::RecordingPublisher;
#[cfg(test)]
use crate::pool_manager::{CrdPoolMappingReader, InMemoryUsageReporter, PoolConfigReader, PoolManager};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::status_reporter::{StatusReporter, StatusReporterConfig};
#[cfg(test)]
use crate::store::{MemoryStore, Stores, WriteLog};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use switch_client::{MockSwitchClient, PortStatus, SwitchCredentials};

#[cfg(test)]
fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
}

/// Helper to create test credentials
#[cfg(test)]
pub fn test_credentials() -> SwitchCredentials {
    SwitchCredentials {
        username: "admin".to_string(),
        password: "secret".to_string(),
    }
}

/// Helper to create a Switch record named after its FQDN
#[cfg(test)]
pub fn create_test_switch(fqdn: &str, bgp_community: Option<i64>) -> Switch {
    Switch {
        metadata: ObjectMeta {
            name: Some(fqdn.to_string()),
            namespace: Some("idcs-system".to_string()),
            ..Default::default()
        },
        spec: SwitchSpec {
            fqdn: fqdn.to_string(),
            ip: "10.0.0.1".to_string(),
            eapi_conf: None,
            bgp: bgp_community.map(|bgp_community| BgpConfig { bgp_community }),
            maintenance: false,
        },
        status: None,
    }
}

/// Helper to create a SwitchPort labelled with its switch
#[cfg(test)]
pub fn create_test_switch_port(name: &str, fqdn: &str, port: &str) -> SwitchPort {
    SwitchPort {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("idcs-system".to_string()),
            labels: labels(&[(LABEL_SWITCH_FQDN, fqdn)]),
            ..Default::default()
        },
        spec: SwitchPortSpec::new(port, NOOP_VLAN_ID, NOOP_PORT_CHANNEL),
        status: None,
    }
}

/// Helper to create a discovered (skeleton) PortChannel
#[cfg(test)]
pub fn create_test_port_channel(name: &str, fqdn: &str, pc_name: &str) -> PortChannel {
    PortChannel {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("idcs-system".to_string()),
            labels: labels(&[(LABEL_SWITCH_FQDN, fqdn)]),
            ..Default::default()
        },
        spec: PortChannelSpec::skeleton(pc_name),
        status: None,
    }
}

/// Helper to create a NetworkNode with only a front-end fabric
#[cfg(test)]
pub fn create_test_network_node(name: &str, switch_port: &str, vlan_id: i64) -> NetworkNode {
    NetworkNode {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("idcs-system".to_string()),
            uid: Some(format!("networknode-{}", name)),
            ..Default::default()
        },
        spec: NetworkNodeSpec {
            front_end_fabric: Some(FrontEndFabric {
                switch_port: switch_port.to_string(),
                vlan_id,
                mode: MODE_ACCESS.to_string(),
                ..Default::default()
            }),
            accelerator_fabric: None,
            storage_fabric: None,
        },
        status: None,
    }
}

/// Helper to create a NodeGroup over front-end members and leaf switches
#[cfg(test)]
pub fn create_test_node_group(name: &str, nodes: &[&str], front_end_switches: &[&str]) -> NodeGroup {
    NodeGroup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("idcs-system".to_string()),
            ..Default::default()
        },
        spec: NodeGroupSpec {
            network_nodes: nodes.iter().map(ToString::to_string).collect(),
            front_end_leaf_switches: front_end_switches.iter().map(ToString::to_string).collect(),
            ..Default::default()
        },
        status: None,
    }
}

/// Adds or replaces a label on any record
#[cfg(test)]
pub fn with_label<K: kube::Resource>(mut obj: K, key: &str, value: &str) -> K {
    obj.meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    obj
}

/// Pool with a VLAN strategy on the front-end fabric
#[cfg(test)]
pub fn create_test_pool(name: &str, front_end_vlan: Option<i64>, unit: SchedulableUnit) -> Pool {
    Pool {
        name: name.to_string(),
        description: String::new(),
        network_config_strategy: Some(NetworkConfigStrategy {
            front_end_fabric_strategy: Some(FabricStrategy {
                isolation_type: IsolationType::Vlan,
                provision_config: ProvisionConfig {
                    default_vlan_id: front_end_vlan,
                    default_bgp_community: None,
                },
            }),
            accelerator_fabric_strategy: None,
            storage_fabric_strategy: None,
        }),
        scheduling_config: SchedulingConfig {
            minimum_schedulable_unit: unit,
        },
    }
}

/// Pool catalog held in memory
#[cfg(test)]
#[derive(Default)]
pub struct StaticPools {
    pools: Mutex<Vec<Pool>>,
}

#[cfg(test)]
impl StaticPools {
    pub fn add(&self, pool: Pool) {
        let mut pools = self.pools.lock().unwrap();
        pools.retain(|p| p.name != pool.name);
        pools.push(pool);
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl PoolConfigReader for StaticPools {
    async fn get_pool_by_name(&self, name: &str) -> Result<Pool, ControllerError> {
        self.pools
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("Pool {}", name)))
    }
}

/// Reconciler, status reporter and pool manager over in-memory state
#[cfg(test)]
pub struct TestEnv {
    pub log: WriteLog,
    pub switches: Arc<MemoryStore<Switch>>,
    pub switch_ports: Arc<MemoryStore<SwitchPort>>,
    pub port_channels: Arc<MemoryStore<PortChannel>>,
    pub network_nodes: Arc<MemoryStore<NetworkNode>>,
    pub node_groups: Arc<MemoryStore<NodeGroup>>,
    pub mappings: Arc<MemoryStore<NodeGroupToPoolMapping>>,
    pub stores: Stores,
    pub mock: MockSwitchClient,
    pub devices: Arc<DevicesAccessManager>,
    pub events: Arc<RecordingPublisher>,
    pub pools: Arc<StaticPools>,
    pub usage: Arc<InMemoryUsageReporter>,
    pub reporter: Arc<StatusReporter>,
    pub reconciler: Reconciler,
}

#[cfg(test)]
impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig {
            port_channels_enabled: true,
            ..Default::default()
        })
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let log = WriteLog::default();
        let switches = Arc::new(MemoryStore::new("Switch", log.clone()));
        let switch_ports = Arc::new(MemoryStore::new("SwitchPort", log.clone()));
        let port_channels = Arc::new(MemoryStore::new("PortChannel", log.clone()));
        let network_nodes = Arc::new(MemoryStore::new("NetworkNode", log.clone()));
        let node_groups = Arc::new(MemoryStore::new("NodeGroup", log.clone()));
        let mappings = Arc::new(MemoryStore::new("NodeGroupToPoolMapping", log.clone()));
        let stores = Stores {
            switches: switches.clone(),
            switch_ports: switch_ports.clone(),
            port_channels: port_channels.clone(),
            network_nodes: network_nodes.clone(),
            node_groups: node_groups.clone(),
            mappings: mappings.clone(),
        };

        let mock = MockSwitchClient::new();
        let devices = Arc::new(DevicesAccessManager::with_credentials(
            Arc::new(MockClientFactory::new(mock.clone())),
            test_credentials(),
            "",
        ));
        let events = Arc::new(RecordingPublisher::default());
        // Long periods: tests drive passes explicitly
        let reporter = Arc::new(StatusReporter::new(
            StatusReporterConfig {
                period: Duration::from_secs(3600),
                accelerated_period: Duration::from_secs(3600),
                bgp_community_group: config.bgp_community_group.clone(),
                port_channels_enabled: config.port_channels_enabled,
            },
            stores.clone(),
            devices.clone(),
            events.clone(),
        ));
        let pools = Arc::new(StaticPools::default());
        let reconciler = Reconciler::new(
            Arc::new(config),
            stores.clone(),
            devices.clone(),
            reporter.clone(),
            pools.clone(),
            events.clone(),
        );

        Self {
            log,
            switches,
            switch_ports,
            port_channels,
            network_nodes,
            node_groups,
            mappings,
            stores,
            mock,
            devices,
            events,
            pools,
            usage: Arc::new(InMemoryUsageReporter::new()),
            reporter,
            reconciler,
        }
    }

    /// Seeds a Switch record and registers its client, without a reporter worker
    pub fn add_switch(&self, fqdn: &str, bgp_community: Option<i64>) -> Switch {
        let switch = create_test_switch(fqdn, bgp_community);
        self.switches.insert(switch.clone());
        self.devices.add_or_update_switch(&switch).unwrap();
        self.switches.object(fqdn).unwrap()
    }

    /// Seeds a live interface on the mock switch
    pub fn add_live_port(&self, fqdn: &str, port: &str, mode: &str, vlan: i64) {
        self.mock.add_port(
            fqdn,
            PortStatus {
                name: port.to_string(),
                mode: mode.to_string(),
                vlan_id: vlan,
                link_status: "connected".to_string(),
                line_protocol_status: "up".to_string(),
                ..Default::default()
            },
        );
    }

    /// One status reporter pass, standing in for the periodic worker
    pub async fn report(&self, fqdn: &str) {
        self.reporter.run_pass(fqdn).await.unwrap();
    }

    pub fn pool_manager(&self) -> PoolManager {
        PoolManager::new(
            self.stores.clone(),
            self.pools.clone(),
            Arc::new(CrdPoolMappingReader::new(self.mappings.clone())),
            self.usage.clone(),
            self.events.clone(),
            true,
        )
    }
}
