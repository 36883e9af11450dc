//! Switch CRD
//!
//! One record per physical leaf switch. Holds the management address used
//! to build a switch client and the desired BGP community.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "sdn.microscaler.io",
    version = "v1alpha1",
    kind = "Switch",
    namespaced,
    status = "SwitchStatus",
    printcolumn = r#"{"name":"IP", "type":"string", "jsonPath":".spec.ip"}"#,
    printcolumn = r#"{"name":"Maintenance", "type":"boolean", "jsonPath":".spec.maintenance"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSpec {
    /// Fully qualified domain name of the switch
    pub fqdn: String,

    /// Management IP address (falls back to the FQDN when empty)
    #[serde(default)]
    pub ip: String,

    /// eAPI connection settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eapi_conf: Option<EapiConf>,

    /// Desired BGP configuration. `None` means BGP is not managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp: Option<BgpConfig>,

    /// Suspends every convergence action on this switch and its ports
    #[serde(default)]
    pub maintenance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EapiConf {
    #[serde(default = "default_eapi_port")]
    pub port: u16,
    #[serde(default = "default_eapi_transport")]
    pub transport: String,
}

impl Default for EapiConf {
    fn default() -> Self {
        Self {
            port: default_eapi_port(),
            transport: default_eapi_transport(),
        }
    }
}

fn default_eapi_port() -> u16 {
    443
}

fn default_eapi_transport() -> String {
    "https".to_string()
}

/// BGP community configuration. Shared by Switch and NodeGroup specs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BgpConfig {
    /// Community value (`-1` = no-op)
    pub bgp_community: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_bgp_config_status: Option<SwitchBgpConfigStatus>,

    /// Last time the status reporter completed a pass for this switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBgpConfigStatus {
    pub last_observed_bgp_community: i64,
}

impl Switch {
    /// Desired BGP community, if BGP is managed on this switch
    #[must_use]
    pub fn desired_bgp_community(&self) -> Option<i64> {
        self.spec.bgp.as_ref().map(|b| b.bgp_community)
    }

    /// Last BGP community observed on the device (0 when unknown)
    #[must_use]
    pub fn observed_bgp_community(&self) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.switch_bgp_config_status.as_ref())
            .map_or(0, |s| s.last_observed_bgp_community)
    }
}
