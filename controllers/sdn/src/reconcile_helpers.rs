//! Helper functions for common reconciliation patterns
//!
//! Each managed interface attribute is diffed on its own: a helper takes
//! the desired and observed value and returns the switch command to run,
//! or nothing when the field is in sync or not managed. SwitchPort and
//! PortChannel reconcilers compose these per-field helpers.

use crate::error::ControllerError;
use crds::{
    PortChannelSpec, PortChannelStatus, SwitchPortSpec, SwitchPortStatus, MODE_ACCESS, MODE_ROUTED,
    NOOP_PORT_CHANNEL, NOOP_VLAN_ID,
};
use std::fmt;
use switch_client::{
    AssignSwitchPortToPortChannelRequest, RemoveSwitchPortFromPortChannelRequest, SwitchClientError,
    SwitchClientTrait, UpdateDescriptionRequest, UpdateModeRequest, UpdateNativeVlanRequest,
    UpdateTrunkGroupsRequest, UpdateVlanRequest,
};
use tracing::{debug, warn};

/// One corrective command for an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceAction {
    Mode(String),
    Description(String),
    Vlan { vlan: i64, update_lldp: bool },
    TrunkGroups(Vec<String>),
    NativeVlan(i64),
    AssignPortChannel(i64),
    RemoveFromPortChannel,
}

impl InterfaceAction {
    /// Field name used in logs and events
    pub fn field(&self) -> &'static str {
        match self {
            InterfaceAction::Mode(_) => "mode",
            InterfaceAction::Description(_) => "description",
            InterfaceAction::Vlan { .. } => "vlan",
            InterfaceAction::TrunkGroups(_) => "trunk groups",
            InterfaceAction::NativeVlan(_) => "native vlan",
            InterfaceAction::AssignPortChannel(_) | InterfaceAction::RemoveFromPortChannel => "port channel",
        }
    }
}

impl fmt::Display for InterfaceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceAction::Mode(mode) => write!(f, "mode {}", mode),
            InterfaceAction::Description(d) => write!(f, "description {:?}", d),
            InterfaceAction::Vlan { vlan, .. } => write!(f, "vlan {}", vlan),
            InterfaceAction::TrunkGroups(groups) => write!(f, "trunk groups [{}]", groups.join(",")),
            InterfaceAction::NativeVlan(vlan) => write!(f, "native vlan {}", vlan),
            InterfaceAction::AssignPortChannel(pc) => write!(f, "port channel {}", pc),
            InterfaceAction::RemoveFromPortChannel => f.write_str("no port channel"),
        }
    }
}

pub(crate) fn mode_action(desired: &str, observed: &str) -> Option<InterfaceAction> {
    (!desired.is_empty() && desired != observed && desired != MODE_ROUTED && observed != MODE_ROUTED)
        .then(|| InterfaceAction::Mode(desired.to_string()))
}

pub(crate) fn description_action(desired: &str, observed: &str) -> Option<InterfaceAction> {
    (!desired.is_empty() && desired.trim() != observed).then(|| InterfaceAction::Description(desired.to_string()))
}

pub(crate) fn trunk_groups_action(desired: Option<&Vec<String>>, observed: &[String]) -> Option<InterfaceAction> {
    let desired = desired?;
    let mut wanted = desired.clone();
    wanted.sort();
    let mut current = observed.to_vec();
    current.sort();
    (wanted != current).then_some(InterfaceAction::TrunkGroups(wanted))
}

pub(crate) fn native_vlan_action(desired: i64, observed: i64) -> Option<InterfaceAction> {
    (desired != NOOP_VLAN_ID && desired != 0 && desired != observed).then_some(InterfaceAction::NativeVlan(desired))
}

/// A port's VLAN is written when it is known on the switch, or when the
/// port is meant to be an access port outside any port-channel.
pub(crate) fn switch_port_vlan_action(spec: &SwitchPortSpec, status: &SwitchPortStatus) -> Option<InterfaceAction> {
    let wanted = spec.vlan_id;
    if wanted == NOOP_VLAN_ID || wanted == 0 || wanted == status.vlan_id {
        return None;
    }
    let standalone_access = spec.mode == MODE_ACCESS && (spec.port_channel == 0 || status.port_channel == 0);
    (status.vlan_id != 0 || standalone_access).then_some(InterfaceAction::Vlan {
        vlan: wanted,
        update_lldp: true,
    })
}

pub(crate) fn port_channel_membership_action(desired: i64, observed: i64) -> Option<InterfaceAction> {
    if desired == NOOP_PORT_CHANNEL || desired == observed {
        return None;
    }
    Some(if desired == 0 {
        InterfaceAction::RemoveFromPortChannel
    } else {
        InterfaceAction::AssignPortChannel(desired)
    })
}

/// Commands needed to converge a SwitchPort, in execution order
pub fn switch_port_actions(
    spec: &SwitchPortSpec,
    status: &SwitchPortStatus,
    port_channels_enabled: bool,
) -> Vec<InterfaceAction> {
    let mut actions: Vec<InterfaceAction> = [
        mode_action(&spec.mode, &status.mode),
        description_action(&spec.description, &status.description),
        switch_port_vlan_action(spec, status),
        trunk_groups_action(spec.trunk_groups.as_ref(), &status.trunk_groups),
        native_vlan_action(spec.native_vlan, status.native_vlan),
    ]
    .into_iter()
    .flatten()
    .collect();

    if port_channels_enabled {
        actions.extend(port_channel_membership_action(spec.port_channel, status.port_channel));
    }
    actions
}

/// Commands needed to converge a PortChannel interface
pub fn port_channel_actions(spec: &PortChannelSpec, status: &PortChannelStatus) -> Vec<InterfaceAction> {
    let vlan = spec.should_update_vlan(status).then_some(InterfaceAction::Vlan {
        vlan: spec.vlan_id,
        update_lldp: false,
    });
    [
        mode_action(&spec.mode, &status.mode),
        description_action(&spec.description, &status.description),
        vlan,
        trunk_groups_action(spec.trunk_groups.as_ref(), &status.trunk_groups),
        native_vlan_action(spec.native_vlan, status.native_vlan),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Runs one command against the switch
pub async fn apply_action(
    client: &dyn SwitchClientTrait,
    switch_fqdn: &str,
    port_name: &str,
    action: &InterfaceAction,
) -> Result<(), SwitchClientError> {
    let switch_fqdn = switch_fqdn.to_string();
    let port_name = port_name.to_string();
    match action {
        InterfaceAction::Mode(mode) => {
            client
                .update_mode(UpdateModeRequest {
                    switch_fqdn,
                    port_name,
                    mode: mode.clone(),
                })
                .await
        }
        InterfaceAction::Description(description) => {
            client
                .update_description(UpdateDescriptionRequest {
                    switch_fqdn,
                    port_name,
                    description: description.clone(),
                })
                .await
        }
        InterfaceAction::Vlan { vlan, update_lldp } => {
            client
                .update_vlan(UpdateVlanRequest {
                    switch_fqdn,
                    port_name,
                    vlan: *vlan,
                    update_lldp: *update_lldp,
                })
                .await
        }
        InterfaceAction::TrunkGroups(groups) => {
            client
                .update_trunk_groups(UpdateTrunkGroupsRequest {
                    switch_fqdn,
                    port_name,
                    trunk_groups: groups.clone(),
                })
                .await
        }
        InterfaceAction::NativeVlan(native_vlan) => {
            client
                .update_native_vlan(UpdateNativeVlanRequest {
                    switch_fqdn,
                    port_name,
                    native_vlan: *native_vlan,
                })
                .await
        }
        InterfaceAction::AssignPortChannel(port_channel) => {
            client
                .assign_switch_port_to_port_channel(AssignSwitchPortToPortChannelRequest {
                    switch_fqdn,
                    port_name,
                    port_channel: *port_channel,
                })
                .await
        }
        InterfaceAction::RemoveFromPortChannel => {
            client
                .remove_switch_port_from_port_channel(RemoveSwitchPortFromPortChannelRequest { switch_fqdn, port_name })
                .await
        }
    }
}

/// Result of running a batch of commands
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub applied: Vec<InterfaceAction>,
    pub failed: Vec<(InterfaceAction, ControllerError)>,
}

impl ActionOutcome {
    pub fn into_result(self) -> Result<(), ControllerError> {
        ControllerError::from_errors(self.failed.into_iter().map(|(_, e)| e).collect())
    }
}

/// Runs every command; a failing command does not stop the others
pub async fn apply_actions(
    client: &dyn SwitchClientTrait,
    switch_fqdn: &str,
    port_name: &str,
    actions: Vec<InterfaceAction>,
) -> ActionOutcome {
    let mut outcome = ActionOutcome::default();
    for action in actions {
        match apply_action(client, switch_fqdn, port_name, &action).await {
            Ok(()) => {
                debug!("Applied {} on {} {}", action, switch_fqdn, port_name);
                outcome.applied.push(action);
            }
            Err(e) => {
                warn!("Failed to apply {} on {} {}: {}", action, switch_fqdn, port_name, e);
                outcome.failed.push((action, e.into()));
            }
        }
    }
    outcome
}

/// "ready/total"
pub fn readiness(ready: usize, total: usize) -> String {
    format!("{}/{}", ready, total)
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
