//! Arista eAPI switch client
//!
//! Sends CLI commands to the switch as JSON-RPC `runCmds` calls on
//! `/command-api`. Reads always reach the device; in read-only mode writes
//! are validated and logged but never sent.

use crate::error::SwitchClientError;
use crate::models::*;
use crate::switch_trait::SwitchClientTrait;
use crate::validation::{
    validate_bgp_community, validate_bgp_group_name, validate_description, validate_port_name, ClientPolicy,
};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Community values are always written as `101:<N>`
const BGP_COMMUNITY_PREFIX: &str = "101";
const ROUTE_MAP: &str = "adv-set-comm";

static PORT_CHANNEL_MEMBERSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^in Po([0-9]+)$").expect("Invalid port-channel membership regex"));
static COMMUNITY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^101:([0-9]{1,5})$").expect("Invalid community value regex"));

/// eAPI client for one switch
#[derive(Debug)]
pub struct EapiSwitchClient {
    client: Client,
    url: String,
    credentials: SwitchCredentials,
    policy: ClientPolicy,
    read_only: bool,
    next_id: AtomicU64,
}

impl EapiSwitchClient {
    /// Create a new eAPI client
    ///
    /// # Arguments
    /// * `host` - management IP or FQDN
    /// * `port` / `transport` - eAPI listener (usually 443 / "https")
    /// * `read_only` - validate and log writes without sending them
    pub fn new(
        host: &str,
        port: u16,
        transport: &str,
        credentials: SwitchCredentials,
        policy: ClientPolicy,
        read_only: bool,
    ) -> Result<Self, SwitchClientError> {
        if host.is_empty() {
            return Err(SwitchClientError::Validation("switch host is empty".to_string()));
        }
        // Switches serve self-signed management certificates
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(SwitchClientError::Http)?;

        Ok(Self {
            client,
            url: format!("{}://{}:{}/command-api", transport, host, port),
            credentials,
            policy,
            read_only,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run commands and return one JSON result per command
    async fn run_cmds(&self, cmds: Vec<String>) -> Result<Vec<Value>, SwitchClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "runCmds",
            "params": {"version": 1, "cmds": cmds, "format": "json"},
            "id": id.to_string(),
        });
        debug!("eAPI request to {}: {:?}", self.url, cmds);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(SwitchClientError::Authentication(format!(
                "switch at {} rejected credentials: {}",
                self.url, status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SwitchClientError::Api(format!("eAPI returned {}: {}", status, text)));
        }

        let reply: JsonRpcResponse = response.json().await?;
        if let Some(err) = reply.error {
            return Err(SwitchClientError::Api(format!(
                "eAPI error {}: {}",
                err.code, err.message
            )));
        }
        Ok(reply.result.unwrap_or_default())
    }

    async fn run_show<T: for<'de> Deserialize<'de>>(&self, cmd: String) -> Result<T, SwitchClientError> {
        let mut results = self.run_cmds(vec![cmd.clone()]).await?;
        if results.is_empty() {
            return Err(SwitchClientError::Api(format!("no result for {}", cmd)));
        }
        Ok(serde_json::from_value(results.swap_remove(0))?)
    }

    async fn write(&self, switch_fqdn: &str, cmds: Vec<String>) -> Result<(), SwitchClientError> {
        if self.read_only {
            info!("Read-only mode, not sending to {}: {:?}", switch_fqdn, cmds);
            return Ok(());
        }
        self.run_cmds(cmds).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    #[serde(default)]
    message: String,
}

// `show interfaces status`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InterfacesStatus {
    #[serde(default)]
    pub interface_statuses: HashMap<String, InterfaceStatusEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InterfaceStatusEntry {
    pub bandwidth: i64,
    pub interface_type: String,
    pub description: String,
    pub duplex: String,
    pub link_status: String,
    pub line_protocol_status: String,
    pub vlan_information: VlanInformation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct VlanInformation {
    pub interface_mode: String,
    pub vlan_id: i64,
    pub vlan_explanation: String,
}

// `show interfaces switchport`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Switchports {
    #[serde(default)]
    pub switchports: HashMap<String, SwitchportEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct SwitchportEntry {
    pub enabled: bool,
    pub switchport_info: SwitchportInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct SwitchportInfo {
    pub mode: String,
    pub access_vlan_id: i64,
    pub trunking_native_vlan_id: i64,
    pub static_trunk_groups: Vec<String>,
}

// `show interfaces <list>`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InterfaceDetails {
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InterfaceDetail {
    pub last_status_change_timestamp: f64,
}

// `show ip community-list <name>`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommunityLists {
    #[serde(default)]
    pub ip_community_lists: HashMap<String, CommunityList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CommunityList {
    pub entries: Vec<CommunityListEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CommunityListEntry {
    pub community_values: Vec<String>,
}

fn is_managed_interface(name: &str) -> bool {
    name.starts_with("Ethernet") || name.starts_with("Port-Channel")
}

/// Names of Ethernet interfaces, sorted, for the `show interfaces` detail call
pub(crate) fn ethernet_names(status: &InterfacesStatus) -> Vec<String> {
    let mut names: Vec<String> = status
        .interface_statuses
        .keys()
        .filter(|n| n.starts_with("Ethernet"))
        .cloned()
        .collect();
    names.sort();
    names
}

/// Merges the three show outputs into per-port status
pub(crate) fn generate_switch_ports(
    status: &InterfacesStatus,
    switchports: &Switchports,
    details: &InterfaceDetails,
) -> Result<HashMap<String, PortStatus>, SwitchClientError> {
    let mut ports = HashMap::new();
    for (name, entry) in &status.interface_statuses {
        if !is_managed_interface(name) {
            continue;
        }

        let vlan_info = &entry.vlan_information;
        let port_channel = PORT_CHANNEL_MEMBERSHIP
            .captures(&vlan_info.vlan_explanation)
            .and_then(|c| c[1].parse::<i64>().ok())
            .unwrap_or(0);

        let (mode, vlan_id, native_vlan, trunk_groups) = match switchports.switchports.get(name) {
            Some(sp) => {
                let mut groups = sp.switchport_info.static_trunk_groups.clone();
                groups.sort();
                (
                    sp.switchport_info.mode.clone(),
                    sp.switchport_info.access_vlan_id,
                    sp.switchport_info.trunking_native_vlan_id,
                    groups,
                )
            }
            None => {
                let mode = match vlan_info.interface_mode.as_str() {
                    "routed" => "routed",
                    "bridged" | "inactive" => "access",
                    "trunk" => "trunk",
                    _ => "",
                };
                (mode.to_string(), vlan_info.vlan_id, 0, Vec::new())
            }
        };

        let last_status_change_timestamp = if name.starts_with("Ethernet") {
            details
                .interfaces
                .get(name)
                .map(|d| d.last_status_change_timestamp as i64)
                .ok_or_else(|| {
                    SwitchClientError::Api(format!("interface {} missing from show interfaces output", name))
                })?
        } else {
            0
        };

        ports.insert(
            name.clone(),
            PortStatus {
                name: name.clone(),
                mode,
                vlan_id,
                description: entry.description.clone(),
                native_vlan,
                trunk_groups,
                port_channel,
                link_status: entry.link_status.clone(),
                line_protocol_status: entry.line_protocol_status.clone(),
                bandwidth: entry.bandwidth,
                duplex: entry.duplex.clone(),
                interface_type: entry.interface_type.clone(),
                last_status_change_timestamp,
            },
        );
    }
    Ok(ports)
}

/// Extracts `N` from the single `101:N` value of a community-list
pub(crate) fn parse_bgp_community(lists: &CommunityLists, group_name: &str) -> Result<i64, SwitchClientError> {
    let list = lists.ip_community_lists.get(group_name).ok_or_else(|| {
        SwitchClientError::NotFound(format!("did not find incoming group {} in response from switch", group_name))
    })?;
    let [entry] = list.entries.as_slice() else {
        return Err(SwitchClientError::NotFound(format!(
            "incoming group {} on switch did not have exactly one entry",
            group_name
        )));
    };
    let [value] = entry.community_values.as_slice() else {
        return Err(SwitchClientError::NotFound(format!(
            "incoming group {} did not have exactly one communityValue",
            group_name
        )));
    };
    let caps = COMMUNITY_VALUE
        .captures(value)
        .ok_or_else(|| SwitchClientError::Api(format!("unexpected community value {} in group {}", value, group_name)))?;
    caps[1]
        .parse::<i64>()
        .map_err(|_| SwitchClientError::Api(format!("unexpected community value {}", value)))
}

fn interface_cmds(port_name: &str, body: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut cmds = vec![
        "enable".to_string(),
        "configure".to_string(),
        format!("interface {}", port_name),
    ];
    cmds.extend(body);
    cmds
}

pub(crate) fn mode_cmds(port_name: &str, mode: &str) -> Vec<String> {
    let body = match mode {
        "trunk" => vec!["switchport mode trunk".to_string(), "no switchport access vlan".to_string()],
        _ => vec![format!("switchport mode {}", mode)],
    };
    interface_cmds(port_name, body)
}

/// `lldp` = Some(true) enables transmit, Some(false) disables it
pub(crate) fn vlan_cmds(port_name: &str, vlan: i64, lldp: Option<bool>) -> Vec<String> {
    let mut body = vec![format!("switchport access vlan {}", vlan)];
    match lldp {
        Some(true) => body.push("lldp transmit".to_string()),
        Some(false) => body.push("no lldp transmit".to_string()),
        None => {}
    }
    interface_cmds(port_name, body)
}

pub(crate) fn trunk_group_cmds(port_name: &str, groups: &[String]) -> Vec<String> {
    let body = std::iter::once("no switchport trunk group".to_string())
        .chain(groups.iter().map(|g| format!("switchport trunk group {}", g)));
    interface_cmds(port_name, body)
}

pub(crate) fn bgp_community_cmds(group_name: &str, community: i64) -> Vec<String> {
    vec![
        "enable".to_string(),
        "configure".to_string(),
        format!("route-map {} permit 10", ROUTE_MAP),
        "no set community".to_string(),
        format!("set community {}:{}", BGP_COMMUNITY_PREFIX, community),
        "exit".to_string(),
        format!("no ip community-list {}", group_name),
        format!("ip community-list {} permit {}:{}", group_name, BGP_COMMUNITY_PREFIX, community),
    ]
}

fn validate_port_channel(port_channel: i64) -> Result<(), SwitchClientError> {
    crds::validate_port_channel_number(port_channel).map_err(|e| SwitchClientError::Validation(e.to_string()))
}

#[async_trait::async_trait]
impl SwitchClientTrait for EapiSwitchClient {
    async fn get_switch_ports(&self, req: GetSwitchPortsRequest) -> Result<HashMap<String, PortStatus>, SwitchClientError> {
        let status: InterfacesStatus = self.run_show("show interfaces status".to_string()).await?;
        let switchports: Switchports = self.run_show("show interfaces switchport".to_string()).await?;

        let ethernets = ethernet_names(&status);
        let details: InterfaceDetails = if ethernets.is_empty() {
            InterfaceDetails::default()
        } else {
            self.run_show(format!("show interfaces {}", ethernets.join(","))).await?
        };

        let ports = generate_switch_ports(&status, &switchports, &details)?;
        debug!("Read {} ports from switch {}", ports.len(), req.switch_fqdn);
        Ok(ports)
    }

    async fn update_mode(&self, req: UpdateModeRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.policy.validate_mode(&req.mode)?;
        info!("Setting mode {} on {} {}", req.mode, req.switch_fqdn, req.port_name);
        self.write(&req.switch_fqdn, mode_cmds(&req.port_name, &req.mode)).await
    }

    async fn update_vlan(&self, req: UpdateVlanRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.policy.validate_vlan(req.vlan)?;
        let lldp = req.update_lldp.then(|| self.policy.is_provisioning_vlan(req.vlan));
        info!("Setting VLAN {} on {} {}", req.vlan, req.switch_fqdn, req.port_name);
        self.write(&req.switch_fqdn, vlan_cmds(&req.port_name, req.vlan, lldp)).await
    }

    async fn update_native_vlan(&self, req: UpdateNativeVlanRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.policy.validate_native_vlan(req.native_vlan)?;
        info!("Setting native VLAN {} on {} {}", req.native_vlan, req.switch_fqdn, req.port_name);
        let cmds = interface_cmds(&req.port_name, [format!("switchport trunk native vlan {}", req.native_vlan)]);
        self.write(&req.switch_fqdn, cmds).await
    }

    async fn update_trunk_groups(&self, req: UpdateTrunkGroupsRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        self.policy.validate_trunk_groups(&req.trunk_groups)?;
        info!("Setting trunk groups {:?} on {} {}", req.trunk_groups, req.switch_fqdn, req.port_name);
        self.write(&req.switch_fqdn, trunk_group_cmds(&req.port_name, &req.trunk_groups)).await
    }

    async fn update_description(&self, req: UpdateDescriptionRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        let description = validate_description(&req.description)?;
        let cmds = interface_cmds(&req.port_name, [format!("description {}", description)]);
        self.write(&req.switch_fqdn, cmds).await
    }

    async fn get_bgp_community(&self, req: GetBgpCommunityRequest) -> Result<i64, SwitchClientError> {
        validate_bgp_group_name(&req.group_name)?;
        let lists: CommunityLists = self.run_show(format!("show ip community-list {}", req.group_name)).await?;
        parse_bgp_community(&lists, &req.group_name)
    }

    async fn update_bgp_community(&self, req: UpdateBgpCommunityRequest) -> Result<(), SwitchClientError> {
        validate_bgp_community(req.bgp_community)?;
        validate_bgp_group_name(&req.group_name)?;
        info!("Setting BGP community {} on {}", req.bgp_community, req.switch_fqdn);
        self.write(&req.switch_fqdn, bgp_community_cmds(&req.group_name, req.bgp_community)).await
    }

    async fn create_port_channel(&self, req: CreatePortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_channel(req.port_channel)?;
        info!("Creating Port-Channel{} on {}", req.port_channel, req.switch_fqdn);
        let cmds = vec![
            "enable".to_string(),
            "configure".to_string(),
            format!("interface port-channel {}", req.port_channel),
        ];
        self.write(&req.switch_fqdn, cmds).await
    }

    async fn delete_port_channel(&self, req: DeletePortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_channel(req.port_channel)?;
        info!("Deleting Port-Channel{} on {}", req.port_channel, req.switch_fqdn);
        let cmds = vec![
            "enable".to_string(),
            "configure".to_string(),
            format!("no interface port-channel {}", req.port_channel),
        ];
        self.write(&req.switch_fqdn, cmds).await
    }

    async fn assign_switch_port_to_port_channel(&self, req: AssignSwitchPortToPortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        validate_port_channel(req.port_channel)?;
        info!("Assigning {} {} to Port-Channel{}", req.switch_fqdn, req.port_name, req.port_channel);
        let cmds = interface_cmds(
            &req.port_name,
            [format!("channel-group {} mode active", req.port_channel), "lacp timer fast".to_string()],
        );
        self.write(&req.switch_fqdn, cmds).await
    }

    async fn remove_switch_port_from_port_channel(&self, req: RemoveSwitchPortFromPortChannelRequest) -> Result<(), SwitchClientError> {
        validate_port_name(&req.port_name)?;
        info!("Removing {} {} from its port-channel", req.switch_fqdn, req.port_name);
        let cmds = interface_cmds(&req.port_name, ["no channel-group".to_string()]);
        self.write(&req.switch_fqdn, cmds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> InterfacesStatus {
        serde_json::from_value(json!({
            "interfaceStatuses": {
                "Ethernet1": {
                    "bandwidth": 100000000000i64,
                    "interfaceType": "100GBASE-CR4",
                    "description": "node-a",
                    "duplex": "duplexFull",
                    "linkStatus": "connected",
                    "lineProtocolStatus": "up",
                    "vlanInformation": {"interfaceMode": "bridged", "vlanId": 100}
                },
                "Ethernet2": {
                    "linkStatus": "connected",
                    "vlanInformation": {"interfaceMode": "bridged", "vlanExplanation": "in Po12"}
                },
                "Ethernet3": {
                    "linkStatus": "notconnect",
                    "vlanInformation": {"interfaceMode": "routed"}
                },
                "Port-Channel12": {
                    "linkStatus": "connected",
                    "vlanInformation": {"interfaceMode": "trunk"}
                },
                "Management1": {
                    "linkStatus": "connected",
                    "vlanInformation": {"interfaceMode": "routed"}
                }
            }
        }))
        .unwrap()
    }

    fn sample_switchports() -> Switchports {
        serde_json::from_value(json!({
            "switchports": {
                "Ethernet1": {
                    "enabled": true,
                    "switchportInfo": {
                        "mode": "trunk",
                        "accessVlanId": 100,
                        "trunkingNativeVlanId": 55,
                        "staticTrunkGroups": ["zeta", "alpha"]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn sample_details() -> InterfaceDetails {
        serde_json::from_value(json!({
            "interfaces": {
                "Ethernet1": {"lastStatusChangeTimestamp": 1700000000.25},
                "Ethernet2": {"lastStatusChangeTimestamp": 1700000001.0},
                "Ethernet3": {"lastStatusChangeTimestamp": 1700000002.0}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_generate_switch_ports_merges_outputs() {
        let ports = generate_switch_ports(&sample_status(), &sample_switchports(), &sample_details()).unwrap();
        assert_eq!(ports.len(), 4, "Management interface should be skipped");

        let eth1 = &ports["Ethernet1"];
        assert_eq!(eth1.mode, "trunk");
        assert_eq!(eth1.vlan_id, 100);
        assert_eq!(eth1.native_vlan, 55);
        assert_eq!(eth1.trunk_groups, vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(eth1.port_channel, 0);
        assert_eq!(eth1.last_status_change_timestamp, 1_700_000_000);

        let eth2 = &ports["Ethernet2"];
        assert_eq!(eth2.mode, "access");
        assert_eq!(eth2.port_channel, 12);

        assert_eq!(ports["Ethernet3"].mode, "routed");
        assert_eq!(ports["Port-Channel12"].mode, "trunk");
        assert_eq!(ports["Port-Channel12"].last_status_change_timestamp, 0);
    }

    #[test]
    fn test_generate_switch_ports_requires_interface_details() {
        let result = generate_switch_ports(&sample_status(), &sample_switchports(), &InterfaceDetails::default());
        assert!(result.is_err(), "Missing interface detail should fail");
    }

    #[test]
    fn test_ethernet_names_are_sorted() {
        assert_eq!(ethernet_names(&sample_status()), vec!["Ethernet1", "Ethernet2", "Ethernet3"]);
    }

    #[test]
    fn test_parse_bgp_community() {
        let lists: CommunityLists = serde_json::from_value(json!({
            "ipCommunityLists": {"idc_dyn_comm_list": {"entries": [{"communityValues": ["101:42"]}]}}
        }))
        .unwrap();
        assert_eq!(parse_bgp_community(&lists, "idc_dyn_comm_list").unwrap(), 42);

        let missing = parse_bgp_community(&lists, "other").unwrap_err();
        assert!(matches!(missing, SwitchClientError::NotFound(_)));

        let two: CommunityLists = serde_json::from_value(json!({
            "ipCommunityLists": {"g": {"entries": [{"communityValues": ["101:1", "101:2"]}]}}
        }))
        .unwrap();
        assert!(matches!(parse_bgp_community(&two, "g"), Err(SwitchClientError::NotFound(_))));

        let foreign: CommunityLists = serde_json::from_value(json!({
            "ipCommunityLists": {"g": {"entries": [{"communityValues": ["65000:1"]}]}}
        }))
        .unwrap();
        assert!(matches!(parse_bgp_community(&foreign, "g"), Err(SwitchClientError::Api(_))));
    }

    #[test]
    fn test_write_commands() {
        assert_eq!(
            mode_cmds("Ethernet1", "trunk"),
            vec!["enable", "configure", "interface Ethernet1", "switchport mode trunk", "no switchport access vlan"]
        );
        assert_eq!(mode_cmds("Ethernet1", "access").last().unwrap(), "switchport mode access");
        assert_eq!(
            vlan_cmds("Ethernet1", 100, Some(false))[3..],
            ["switchport access vlan 100".to_string(), "no lldp transmit".to_string()]
        );
        assert_eq!(vlan_cmds("Port-Channel2", 100, None).len(), 4);
        assert_eq!(
            trunk_group_cmds("Ethernet1", &["a".to_string()])[3..],
            ["no switchport trunk group".to_string(), "switchport trunk group a".to_string()]
        );
        let bgp = bgp_community_cmds("idc_dyn_comm_list", 7);
        assert!(bgp.contains(&"set community 101:7".to_string()));
        assert_eq!(bgp.last().unwrap(), "ip community-list idc_dyn_comm_list permit 101:7");
    }

    #[tokio::test]
    async fn test_read_only_rejects_invalid_write_before_io() {
        let policy = ClientPolicy::from_ranges("100-200", "1", "", &["access"], &[]).unwrap();
        let creds = SwitchCredentials { username: "u".to_string(), password: "p".to_string() };
        let client = EapiSwitchClient::new("127.0.0.1", 1, "https", creds, policy, true).unwrap();

        let bad = client
            .update_vlan(UpdateVlanRequest {
                switch_fqdn: "sw1".to_string(),
                port_name: "Ethernet1".to_string(),
                vlan: 4000,
                update_lldp: true,
            })
            .await;
        assert!(matches!(bad, Err(SwitchClientError::Validation(_))));

        let good = client
            .update_vlan(UpdateVlanRequest {
                switch_fqdn: "sw1".to_string(),
                port_name: "Ethernet1".to_string(),
                vlan: 150,
                update_lldp: true,
            })
            .await;
        assert!(good.is_ok(), "Read-only write should not reach the device");
    }
}
