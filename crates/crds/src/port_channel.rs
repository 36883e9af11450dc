//! PortChannel CRD
//!
//! Aggregated interface on a switch. Record name is `po<N>.<fqdn>`.
//! Records discovered on the switch are created as empty skeletons; the
//! controller only drives a port-channel once one of its desired fields
//! is set.

use crate::constants::{MODE_ACCESS, NOOP_VLAN_ID};
use crate::switch_port::default_noop_vlan;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "PortChannel",
    namespaced,
    status = "PortChannelStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PortChannelSpec {
    /// Interface name on the switch (e.g. "Port-Channel12")
    pub name: String,

    #[serde(default)]
    pub mode: String,

    #[serde(default)]
    pub vlan_id: i64,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_noop_vlan")]
    pub native_vlan: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortChannelStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub vlan_id: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub native_vlan: i64,
    #[serde(default)]
    pub trunk_groups: Vec<String>,
    #[serde(default)]
    pub link_status: String,
    #[serde(default)]
    pub line_protocol_status: String,
    #[serde(default)]
    pub bandwidth: i64,
    #[serde(default)]
    pub duplex: String,
    #[serde(default)]
    pub interface_type: String,
    #[serde(default)]
    pub switch_side_last_status_change_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_change_time: Option<DateTime<Utc>>,
}

impl PortChannelSpec {
    /// Skeleton spec for a port-channel discovered on the switch
    #[must_use]
    pub fn skeleton(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: String::new(),
            vlan_id: 0,
            description: String::new(),
            native_vlan: NOOP_VLAN_ID,
            trunk_groups: None,
        }
    }

    /// Whether any desired field is set. Port-channels that were only
    /// discovered are never created or deleted on the switch.
    #[must_use]
    pub fn is_controller_owned(&self) -> bool {
        !self.mode.is_empty()
            || (self.vlan_id != 0 && self.vlan_id != NOOP_VLAN_ID)
            || self.trunk_groups.is_some()
    }

    /// Whether the desired VLAN should be written given the observed state
    #[must_use]
    pub fn should_update_vlan(&self, observed: &PortChannelStatus) -> bool {
        self.vlan_id != NOOP_VLAN_ID
            && self.vlan_id != 0
            && (observed.vlan_id != 0 || self.mode == MODE_ACCESS)
            && self.vlan_id != observed.vlan_id
    }
}

impl PortChannel {
    #[must_use]
    pub fn observed(&self) -> PortChannelStatus {
        self.status.clone().unwrap_or_default()
    }
}
