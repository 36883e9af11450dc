//! SDN Controller CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the switch control plane:
//! physical switches, their ports and port-channels, the compute nodes
//! attached to them, node groups, and the pool catalog that drives
//! NodeGroup migrations.

pub mod constants;
pub mod naming;
pub mod switch;
pub mod switch_port;
pub mod port_channel;
pub mod network_node;
pub mod node_group;
pub mod node_group_to_pool_mapping;
pub mod pool;

pub use constants::*;
pub use naming::*;
pub use switch::*;
pub use switch_port::*;
pub use port_channel::*;
pub use network_node::*;
pub use node_group::*;
pub use node_group_to_pool_mapping::*;
pub use pool::*;
