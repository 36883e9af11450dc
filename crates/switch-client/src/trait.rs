//! SwitchClient trait
//!
//! Abstracts the per-switch command interface so reconcilers can run
//! against a real device, a read-only device or an in-memory mock.

use crate::error::SwitchClientError;
use crate::models::*;
use std::collections::HashMap;

/// Trait for switch command operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SwitchClientTrait: Send + Sync {
    /// Live state of every Ethernet interface and port-channel, keyed by interface name
    async fn get_switch_ports(&self, req: GetSwitchPortsRequest) -> Result<HashMap<String, PortStatus>, SwitchClientError>;

    async fn update_mode(&self, req: UpdateModeRequest) -> Result<(), SwitchClientError>;
    async fn update_vlan(&self, req: UpdateVlanRequest) -> Result<(), SwitchClientError>;
    async fn update_native_vlan(&self, req: UpdateNativeVlanRequest) -> Result<(), SwitchClientError>;
    async fn update_trunk_groups(&self, req: UpdateTrunkGroupsRequest) -> Result<(), SwitchClientError>;
    async fn update_description(&self, req: UpdateDescriptionRequest) -> Result<(), SwitchClientError>;

    /// Community value configured in the named community-list.
    /// Returns `NotFound` when the list is absent or malformed on the switch.
    async fn get_bgp_community(&self, req: GetBgpCommunityRequest) -> Result<i64, SwitchClientError>;
    async fn update_bgp_community(&self, req: UpdateBgpCommunityRequest) -> Result<(), SwitchClientError>;

    // Port-channel operations
    async fn create_port_channel(&self, req: CreatePortChannelRequest) -> Result<(), SwitchClientError>;
    async fn delete_port_channel(&self, req: DeletePortChannelRequest) -> Result<(), SwitchClientError>;
    async fn assign_switch_port_to_port_channel(&self, req: AssignSwitchPortToPortChannelRequest) -> Result<(), SwitchClientError>;
    async fn remove_switch_port_from_port_channel(&self, req: RemoveSwitchPortFromPortChannelRequest) -> Result<(), SwitchClientError>;
}
