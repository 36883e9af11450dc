//! Shared constants
//!
//! Label keys, sentinel values and well-known strings shared by every
//! resource kind. Labels carry the cross-references between records
//! (switch, node, group, pool) instead of foreign keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// API group for all SDN resources
pub const API_GROUP: &str = "sdn.microscaler.io";

/// Label on SwitchPort/PortChannel records naming the owning switch
pub const LABEL_SWITCH_FQDN: &str = "switch_fqdn";
/// Label on SwitchPort records naming the NetworkNode that uses the port
pub const LABEL_NETWORK_NODE: &str = "network_node";
/// Label on SwitchPort records naming the fabric the port belongs to
pub const LABEL_FABRIC_TYPE: &str = "fabric_type";
/// Label on NodeGroup records naming the pool the group currently belongs to
pub const LABEL_POOL: &str = "pool";
/// Label on NodeGroup records holding the migration lock state
pub const LABEL_MAINTENANCE: &str = "maintenance";
/// Label on NetworkNode/Switch records naming their NodeGroup
pub const LABEL_GROUP_ID: &str = "group_id";

/// VLAN value meaning "do not touch"
pub const NOOP_VLAN_ID: i64 = -1;
/// BGP community value meaning "do not touch"
pub const NOOP_BGP_COMMUNITY: i64 = -1;
/// Port-channel value meaning "do not manage membership"
pub const NOOP_PORT_CHANNEL: i64 = -1;

/// NodeGroup is locked while member records are being rewritten
pub const MAINTENANCE_IN_PROGRESS: &str = "inProgress";
/// Member records were rewritten, waiting for the switches to converge
pub const MAINTENANCE_WAITING_FOR_READY: &str = "waitingForReady";

/// Finalizer that blocks PortChannel deletion until the switch side is cleaned up
pub const PORT_CHANNEL_FINALIZER: &str = "sdn.microscaler.io/portchannel-finalizer";
/// Finalizer that keeps a NodeGroupToPoolMapping until its NodeGroup is unmapped
pub const POOL_MAPPING_FINALIZER: &str = "sdn.microscaler.io/poolmapping-finalizer";

/// Access mode
pub const MODE_ACCESS: &str = "access";
/// Trunk mode
pub const MODE_TRUNK: &str = "trunk";
/// Routed (layer 3) interface
pub const MODE_ROUTED: &str = "routed";

/// One of the three independent network planes a compute node connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fabric {
    /// Tenant-facing network
    FrontEnd,
    /// GPU/accelerator interconnect
    Accelerator,
    /// Storage network
    Storage,
}

impl Fabric {
    /// All fabrics in processing order
    pub const ALL: [Fabric; 3] = [Fabric::FrontEnd, Fabric::Accelerator, Fabric::Storage];

    /// Value used in the `fabric_type` label
    #[must_use]
    pub fn label_value(self) -> &'static str {
        match self {
            Fabric::FrontEnd => "frontend",
            Fabric::Accelerator => "accelerator",
            Fabric::Storage => "storage",
        }
    }
}

impl fmt::Display for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}
