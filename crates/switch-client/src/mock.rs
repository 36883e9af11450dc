//! Mock switch client
//!
//! In-memory switch fabric implementing [`SwitchClientTrait`]. Writes are
//! applied immediately so a later `get_switch_ports` observes them. Every
//! call is recorded, and individual methods can be made to fail.

use crate::error::SwitchClientError;
use crate::models::*;
use crate::switch_trait::SwitchClientTrait;
use crate::validation::{validate_bgp_community, validate_description, validate_port_name, ClientPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type PortKey = (String, String);

/// Mock SwitchClient for testing and the `mock` backend
///
/// Clones share state, so one instance can stand in for every switch.
#[derive(Debug, Clone, Default)]
pub struct MockSwitchClient {
    policy: Option<ClientPolicy>,
    // (switch fqdn, interface name) -> state
    ports: Arc<Mutex<HashMap<PortKey, PortStatus>>>,
    // (switch fqdn, community-list) -> community
    bgp: Arc<Mutex<HashMap<PortKey, i64>>>,
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashSet<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(switch_fqdn: &str, name: &str) -> PortKey {
    (switch_fqdn.to_string(), name.to_string())
}

impl MockSwitchClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate writes against a policy, like a real client does
    #[must_use]
    pub fn with_policy(mut self, policy: ClientPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Add or replace an interface (for test setup)
    pub fn add_port(&self, switch_fqdn: &str, port: PortStatus) {
        lock(&self.ports).insert(key(switch_fqdn, &port.name), port);
    }

    pub fn remove_port(&self, switch_fqdn: &str, name: &str) {
        lock(&self.ports).remove(&key(switch_fqdn, name));
    }

    pub fn port(&self, switch_fqdn: &str, name: &str) -> Option<PortStatus> {
        lock(&self.ports).get(&key(switch_fqdn, name)).cloned()
    }

    /// Change a port behind the controller's back
    pub fn set_port_vlan(&self, switch_fqdn: &str, name: &str, vlan: i64) {
        if let Some(port) = lock(&self.ports).get_mut(&key(switch_fqdn, name)) {
            port.vlan_id = vlan;
        }
    }

    pub fn set_bgp_community(&self, switch_fqdn: &str, group_name: &str, community: i64) {
        lock(&self.bgp).insert(key(switch_fqdn, group_name), community);
    }

    pub fn bgp_community(&self, switch_fqdn: &str, group_name: &str) -> Option<i64> {
        lock(&self.bgp).get(&key(switch_fqdn, group_name)).copied()
    }

    /// Make every call to `method` fail with an API error
    pub fn fail_on(&self, method: &str) {
        lock(&self.failures).insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Recorded calls, e.g. `update_vlan sw1 Ethernet1 100`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Recorded calls that change switch state
    pub fn write_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, method: &str, call: String) -> Result<(), SwitchClientError> {
        lock(&self.calls).push(call);
        if lock(&self.failures).contains(method) {
            return Err(SwitchClientError::Api(format!("injected failure for {}", method)));
        }
        Ok(())
    }

    fn update_port<F>(&self, switch_fqdn: &str, port_name: &str, apply: F)
    where
        F: FnOnce(&mut PortStatus),
    {
        let mut ports = lock(&self.ports);
        let port = ports.entry(key(switch_fqdn, port_name)).or_insert_with(|| PortStatus {
            name: port_name.to_string(),
            link_status: "connected".to_string(),
            line_protocol_status: "up".to_string(),
            ..Default::default()
        });
        apply(port);
    }
}

#[async_trait::async_trait]
impl SwitchClientTrait for MockSwitchClient {
    async fn get_switch_ports(&self, req: GetSwitchPortsRequest) -> Result<HashMap<String, PortStatus>, SwitchClientError> {
        self.record("get_switch_ports", format!("get_switch_ports {}", req.switch_fqdn))?;
        Ok(lock(&self.ports)
            .iter()
            .filter(|((fqdn, _), _)| *fqdn == req.switch_fqdn)
            .map(|((_, name), port)| (name.clone(), port.clone()))
            .collect())
    }

    async fn update_mode(&self, req: UpdateModeRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        if let Some(policy) = &self.policy {
            policy.validate_mode(&req.mode)?;
        }
        self.record("update_mode", format!("update_mode {} {} {}", req.switch_fqdn, req.port_name, req.mode))?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.mode = req.mode.clone());
        Ok(())
    }

    async fn update_vlan(&self, req: UpdateVlanRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        if let Some(policy) = &self.policy {
            policy.validate_vlan(req.vlan)?;
        }
        self.record("update_vlan", format!("update_vlan {} {} {}", req.switch_fqdn, req.port_name, req.vlan))?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.vlan_id = req.vlan);
        Ok(())
    }

    async fn update_native_vlan(&self, req: UpdateNativeVlanRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        if let Some(policy) = &self.policy {
            policy.validate_native_vlan(req.native_vlan)?;
        }
        self.record(
            "update_native_vlan",
            format!("update_native_vlan {} {} {}", req.switch_fqdn, req.port_name, req.native_vlan),
        )?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.native_vlan = req.native_vlan);
        Ok(())
    }

    async fn update_trunk_groups(&self, req: UpdateTrunkGroupsRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        if let Some(policy) = &self.policy {
            policy.validate_trunk_groups(&req.trunk_groups)?;
        }
        self.record(
            "update_trunk_groups",
            format!("update_trunk_groups {} {} {}", req.switch_fqdn, req.port_name, req.trunk_groups.join(",")),
        )?;
        let mut groups = req.trunk_groups.clone();
        groups.sort();
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.trunk_groups = groups);
        Ok(())
    }

    async fn update_description(&self, req: UpdateDescriptionRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        let description = validate_description(&req.description)?;
        self.record(
            "update_description",
            format!("update_description {} {} {}", req.switch_fqdn, req.port_name, description),
        )?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.description = description);
        Ok(())
    }

    async fn get_bgp_community(&self, req: GetBgpCommunityRequest) -> Result<i64, SwitchClientError> {
        self.record("get_bgp_community", format!("get_bgp_community {} {}", req.switch_fqdn, req.group_name))?;
        self.bgp_community(&req.switch_fqdn, &req.group_name).ok_or_else(|| {
            SwitchClientError::NotFound(format!(
                "did not find incoming group {} in response from switch",
                req.group_name
            ))
        })
    }

    async fn update_bgp_community(&self, req: UpdateBgpCommunityRequest) -> Result<(), SwitchClientError> {
        validate_bgp_community(req.bgp_community)?;
        self.record(
            "update_bgp_community",
            format!("update_bgp_community {} {}", req.switch_fqdn, req.bgp_community),
        )?;
        self.set_bgp_community(&req.switch_fqdn, &req.group_name, req.bgp_community);
        Ok(())
    }

    async fn create_port_channel(&self, req: CreatePortChannelRequest) -> Result<(), SwitchClientError> {
        let name = crds::port_channel_number_to_name(req.port_channel)
            .map_err(|e| SwitchClientError::Validation(e.to_string()))?;
        self.record("create_port_channel", format!("create_port_channel {} {}", req.switch_fqdn, req.port_channel))?;
        self.update_port(&req.switch_fqdn, &name, |_| {});
        Ok(())
    }

    async fn delete_port_channel(&self, req: DeletePortChannelRequest) -> Result<(), SwitchClientError> {
        let name = crds::port_channel_number_to_name(req.port_channel)
            .map_err(|e| SwitchClientError::Validation(e.to_string()))?;
        self.record("delete_port_channel", format!("delete_port_channel {} {}", req.switch_fqdn, req.port_channel))?;
        let mut ports = lock(&self.ports);
        ports.remove(&key(&req.switch_fqdn, &name));
        for ((fqdn, _), port) in ports.iter_mut() {
            if *fqdn == req.switch_fqdn && port.port_channel == req.port_channel {
                port.port_channel = 0;
            }
        }
        Ok(())
    }

    async fn assign_switch_port_to_port_channel(&self, req: AssignSwitchPortToPortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.record(
            "assign_switch_port_to_port_channel",
            format!("assign_switch_port_to_port_channel {} {} {}", req.switch_fqdn, req.port_name, req.port_channel),
        )?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.port_channel = req.port_channel);
        Ok(())
    }

    async fn remove_switch_port_from_port_channel(&self, req: RemoveSwitchPortFromPortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.record(
            "remove_switch_port_from_port_channel",
            format!("remove_switch_port_from_port_channel {} {}", req.switch_fqdn, req.port_name),
        )?;
        self.update_port(&req.switch_fqdn, &req.port_name, |p| p.port_channel = 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_are_observed_by_reads() {
        let mock = MockSwitchClient::new();
        mock.update_vlan(UpdateVlanRequest {
            switch_fqdn: "sw1".to_string(),
            port_name: "Ethernet5".to_string(),
            vlan: 100,
            update_lldp: true,
        })
        .await
        .unwrap();

        let ports = mock
            .get_switch_ports(GetSwitchPortsRequest { switch_fqdn: "sw1".to_string() })
            .await
            .unwrap();
        assert_eq!(ports["Ethernet5"].vlan_id, 100);

        let other = mock
            .get_switch_ports(GetSwitchPortsRequest { switch_fqdn: "sw2".to_string() })
            .await
            .unwrap();
        assert!(other.is_empty(), "Ports are scoped per switch");
        assert_eq!(mock.write_calls(), vec!["update_vlan sw1 Ethernet5 100".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mock = MockSwitchClient::new();
        mock.fail_on("update_mode");
        let result = mock
            .update_mode(UpdateModeRequest {
                switch_fqdn: "sw1".to_string(),
                port_name: "Ethernet5".to_string(),
                mode: "access".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SwitchClientError::Api(_))));
        assert!(mock.port("sw1", "Ethernet5").is_none(), "Failed write should not apply");
    }

    #[tokio::test]
    async fn test_port_channel_lifecycle() {
        let mock = MockSwitchClient::new();
        mock.create_port_channel(CreatePortChannelRequest { switch_fqdn: "sw1".to_string(), port_channel: 3 })
            .await
            .unwrap();
        mock.assign_switch_port_to_port_channel(AssignSwitchPortToPortChannelRequest {
            switch_fqdn: "sw1".to_string(),
            port_name: "Ethernet1".to_string(),
            port_channel: 3,
        })
        .await
        .unwrap();
        assert!(mock.port("sw1", "Port-Channel3").is_some());
        assert_eq!(mock.port("sw1", "Ethernet1").unwrap().port_channel, 3);

        mock.delete_port_channel(DeletePortChannelRequest { switch_fqdn: "sw1".to_string(), port_channel: 3 })
            .await
            .unwrap();
        assert!(mock.port("sw1", "Port-Channel3").is_none());
        assert_eq!(mock.port("sw1", "Ethernet1").unwrap().port_channel, 0);
    }

    #[tokio::test]
    async fn test_bgp_group_missing_is_not_found() {
        let mock = MockSwitchClient::new();
        let result = mock
            .get_bgp_community(GetBgpCommunityRequest {
                switch_fqdn: "sw1".to_string(),
                group_name: "g".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SwitchClientError::NotFound(_))));
    }
}
