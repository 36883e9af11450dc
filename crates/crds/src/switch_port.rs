//! SwitchPort CRD
//!
//! One record per managed physical interface. The record name encodes the
//! port and its switch (`ethernet27-1.<fqdn>`); the `switch_fqdn` label
//! names the switch. Ownership by a NetworkNode is expressed with a
//! controller owner reference that is set once and never overwritten.

use crate::constants::{NOOP_PORT_CHANNEL, NOOP_VLAN_ID};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "SwitchPort",
    namespaced,
    status = "SwitchPortStatus",
    printcolumn = r#"{"name":"Port", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Vlan", "type":"integer", "jsonPath":".spec.vlanId"}"#,
    printcolumn = r#"{"name":"Observed", "type":"integer", "jsonPath":".status.vlanId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchPortSpec {
    /// Interface name on the switch (e.g. "Ethernet27/1")
    pub name: String,

    /// Desired mode ("access", "trunk"). Empty means not managed.
    #[serde(default)]
    pub mode: String,

    /// Desired access VLAN (`-1` = no-op, `0` = unset)
    #[serde(default)]
    pub vlan_id: i64,

    #[serde(default)]
    pub description: String,

    /// Desired native VLAN for trunk ports (`-1` = no-op)
    #[serde(default = "default_noop_vlan")]
    pub native_vlan: i64,

    /// Desired trunk groups. `None` = don't manage, empty list = clear all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_groups: Option<Vec<String>>,

    /// Desired port-channel membership (`-1` = don't manage, `0` = not a member)
    #[serde(default = "default_noop_port_channel")]
    pub port_channel: i64,
}

pub(crate) fn default_noop_vlan() -> i64 {
    NOOP_VLAN_ID
}

fn default_noop_port_channel() -> i64 {
    NOOP_PORT_CHANNEL
}

/// Observed interface state as last reported by the switch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchPortStatus {
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
    pub port_channel: i64,
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
    /// Last link change as reported by the switch (unix seconds)
    #[serde(default)]
    pub switch_side_last_status_change_timestamp: i64,
    /// Last time any observed field changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_change_time: Option<DateTime<Utc>>,
}

impl SwitchPortSpec {
    /// Skeleton spec for a port that is not yet managed beyond its VLAN
    #[must_use]
    pub fn new(name: impl Into<String>, vlan_id: i64, port_channel: i64) -> Self {
        Self {
            name: name.into(),
            mode: String::new(),
            vlan_id,
            description: String::new(),
            native_vlan: NOOP_VLAN_ID,
            trunk_groups: None,
            port_channel,
        }
    }
}

impl SwitchPort {
    /// Observed status, or an all-zero status when nothing was reported yet
    #[must_use]
    pub fn observed(&self) -> SwitchPortStatus {
        self.status.clone().unwrap_or_default()
    }
}
