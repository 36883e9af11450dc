//! NodeGroup reconciler
//!
//! When the group's pool schedules whole NodeGroups, the group-level fabric
//! policy is pushed down: VLANs into member NetworkNodes and BGP
//! communities into leaf Switches. Readiness is aggregated per fabric from
//! what those records report as observed.
//!
//! The reconciler stays away from a group while the pool manager holds its
//! `maintenance=inProgress` lock.

use super::{Reconciler, NODE_GROUP_CONVERGING_REQUEUE, NOT_READY_REQUEUE};
use crate::error::ControllerError;
use crate::pool_manager::network_node_fabric_key;
use crate::reconcile_helpers::readiness;
use crate::store::with_resource_version;
use crds::{
    BgpConfigStatus, Fabric, FabricConfigStatus, NetworkNodeVlanReadiness, NodeGroup, NodeGroupStatus,
    SchedulableUnit, SwitchBgpConfStatus, VlanConfigStatus, LABEL_GROUP_ID, LABEL_MAINTENANCE, LABEL_POOL,
    MAINTENANCE_IN_PROGRESS, NOOP_BGP_COMMUNITY, NOOP_VLAN_ID,
};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

fn count(items: &[String]) -> i64 {
    i64::try_from(items.len()).unwrap_or(i64::MAX)
}

fn fabric_status_key(fabric: Fabric) -> &'static str {
    match fabric {
        Fabric::FrontEnd => "frontEndFabricStatus",
        Fabric::Accelerator => "acceleratorFabricStatus",
        Fabric::Storage => "storageFabricStatus",
    }
}

/// Merge patch replacing the whole status. Fabrics without a status are
/// sent as `null` so stale readiness is dropped.
fn status_patch(status: &NodeGroupStatus) -> Result<Value, ControllerError> {
    let mut value = serde_json::to_value(status)?;
    if let Some(map) = value.as_object_mut() {
        for fabric in Fabric::ALL {
            if status.fabric_status(fabric).is_none() {
                map.insert(fabric_status_key(fabric).to_string(), Value::Null);
            }
        }
    }
    Ok(json!({ "status": value }))
}

impl Reconciler {
    pub async fn reconcile_node_group(&self, node_group: &NodeGroup) -> Result<Action, ControllerError> {
        let name = node_group.name_any();
        let Some(group) = self.stores.node_groups.get_opt(&name).await? else {
            debug!("NodeGroup {} not found", name);
            return Ok(Action::await_change());
        };
        if group.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }
        if group.labels().get(LABEL_MAINTENANCE).map(String::as_str) == Some(MAINTENANCE_IN_PROGRESS) {
            debug!("NodeGroup {} is being migrated, skipping", name);
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }

        let mut status = NodeGroupStatus {
            network_nodes_count: count(&group.spec.network_nodes),
            front_end_switch_count: count(&group.spec.front_end_leaf_switches),
            acc_switch_count: count(&group.spec.accelerator_leaf_switches),
            storage_switch_count: count(&group.spec.storage_leaf_switches),
            ..Default::default()
        };
        let mut errors = Vec::new();
        let mut ready = true;

        match group.labels().get(LABEL_POOL).filter(|p| !p.is_empty()) {
            None => debug!("NodeGroup {} has no pool", name),
            Some(pool_name) => {
                let pool = self.pools.get_pool_by_name(pool_name).await?;
                errors.extend(self.refresh_group_labels(&group).await);

                if pool.schedulable_unit() == SchedulableUnit::NodeGroup {
                    for fabric in Fabric::ALL {
                        let Some(config) = group.spec.fabric_config(fabric) else {
                            continue;
                        };
                        let previous = group.status.as_ref().and_then(|s| s.fabric_status(fabric));
                        let mut fabric_status = FabricConfigStatus::default();

                        let vlan = config.vlan_conf.as_ref().map(|c| c.vlan_id);
                        if let Some(vlan) = vlan.filter(|v| *v != NOOP_VLAN_ID) {
                            if vlan == 0 {
                                ready = false;
                                errors.push(ControllerError::Validation(format!(
                                    "NodeGroup {}: {} VLAN 0 is not allowed",
                                    name, fabric
                                )));
                                if let Some(previous) = previous {
                                    fabric_status.vlan_config_status = previous.vlan_config_status.clone();
                                }
                            } else {
                                let (vlan_status, member_errors) =
                                    self.converge_group_vlan(&group, fabric, vlan, previous).await;
                                ready &= vlan_status.ready;
                                fabric_status.vlan_config_status = vlan_status;
                                errors.extend(member_errors);
                            }
                        }

                        let bgp = config.bgp_conf.as_ref().map(|c| c.bgp_community);
                        if let Some(bgp) = bgp.filter(|b| *b != NOOP_BGP_COMMUNITY) {
                            if bgp == 0 {
                                ready = false;
                                errors.push(ControllerError::Validation(format!(
                                    "NodeGroup {}: {} BGP community 0 is not allowed",
                                    name, fabric
                                )));
                                if let Some(previous) = previous {
                                    fabric_status.bgp_config_status = previous.bgp_config_status.clone();
                                }
                            } else {
                                let (bgp_status, member_errors) =
                                    self.converge_group_bgp(&group, fabric, bgp, previous).await;
                                ready &= bgp_status.ready;
                                fabric_status.bgp_config_status = bgp_status;
                                errors.extend(member_errors);
                            }
                        }

                        *status.fabric_status_mut(fabric) = Some(fabric_status);
                    }
                }
            }
        }

        if group.status.as_ref() != Some(&status) {
            if let Err(e) = self.stores.node_groups.patch_status(&name, &status_patch(&status)?).await {
                errors.push(e);
            }
        }

        ControllerError::from_errors(errors)?;
        if ready {
            Ok(Action::requeue(self.config.node_group_resync_period))
        } else {
            Ok(Action::requeue(NODE_GROUP_CONVERGING_REQUEUE))
        }
    }

    /// Keeps `group_id` on member NetworkNodes and accelerator leaf Switches
    async fn refresh_group_labels(&self, group: &NodeGroup) -> Vec<ControllerError> {
        let name = group.name_any();
        let mut errors = Vec::new();
        let patch = json!({"metadata": {"labels": {LABEL_GROUP_ID: name}}});

        for node_name in &group.spec.network_nodes {
            let node = match self.stores.network_nodes.get_opt(node_name).await {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            match node.labels().get(LABEL_GROUP_ID) {
                Some(current) if *current == name => {}
                Some(current) => {
                    warn!("NetworkNode {} is labelled for NodeGroup {}, not {}", node_name, current, name);
                }
                None => {
                    let patch = with_resource_version(patch.clone(), &node);
                    if let Err(e) = self.stores.network_nodes.patch(node_name, &patch).await {
                        errors.push(e);
                    }
                }
            }
        }

        for switch_name in &group.spec.accelerator_leaf_switches {
            let switch = match self.stores.switches.get_opt(switch_name).await {
                Ok(Some(switch)) => switch,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if switch.labels().get(LABEL_GROUP_ID) != Some(&name) {
                let patch = with_resource_version(patch.clone(), &switch);
                if let Err(e) = self.stores.switches.patch(switch_name, &patch).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Pushes `vlan` into every member NetworkNode and counts the ones
    /// whose ports all report it. A member that cannot be read or patched
    /// counts as not ready and does not stop the others.
    async fn converge_group_vlan(
        &self,
        group: &NodeGroup,
        fabric: Fabric,
        vlan: i64,
        previous: Option<&FabricConfigStatus>,
    ) -> (VlanConfigStatus, Vec<ControllerError>) {
        let total = group.spec.network_nodes.len();
        let mut ready = 0;
        let mut errors = Vec::new();
        let mut by_node = Vec::with_capacity(total);
        for node_name in &group.spec.network_nodes {
            let node = match self.stores.network_nodes.get_opt(node_name).await {
                Ok(Some(node)) => node,
                Ok(None) => {
                    warn!("NodeGroup {}: NetworkNode {} not found", group.name_any(), node_name);
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            let observed = node
                .status
                .clone()
                .unwrap_or_default()
                .observed_fabric_vlans(fabric, &node.spec);
            if node.spec.fabric_vlan(fabric) == Some(vlan) {
                let expected = node.spec.fabric_port_count(fabric);
                if expected > 0 && observed.len() >= expected && observed.iter().all(|(_, v)| *v == vlan) {
                    ready += 1;
                }
            } else {
                info!("NodeGroup {}: setting {} VLAN {} on NetworkNode {}", group.name_any(), fabric, vlan, node_name);
                let patch = json!({"spec": {network_node_fabric_key(fabric): {"vlanId": vlan}}});
                if let Err(e) = self
                    .stores
                    .network_nodes
                    .patch(node_name, &with_resource_version(patch, &node))
                    .await
                {
                    warn!("NodeGroup {}: failed to update NetworkNode {}: {}", group.name_any(), node_name, e);
                    errors.push(e);
                }
            }

            by_node.push(NetworkNodeVlanReadiness {
                network_node_name: node_name.clone(),
                last_observed_vlan_id: observed.into_iter().collect(),
            });
        }

        let all_ready = ready == total;
        let status = VlanConfigStatus {
            readiness: readiness(ready, total),
            ready: all_ready,
            last_observed_ready_vlan: if all_ready {
                vlan
            } else {
                previous.map_or(0, |p| p.vlan_config_status.last_observed_ready_vlan)
            },
            readiness_by_network_node: by_node,
        };
        (status, errors)
    }

    /// Pushes `community` into every leaf Switch of a fabric
    async fn converge_group_bgp(
        &self,
        group: &NodeGroup,
        fabric: Fabric,
        community: i64,
        previous: Option<&FabricConfigStatus>,
    ) -> (BgpConfigStatus, Vec<ControllerError>) {
        let switches = group.spec.leaf_switches(fabric);
        let mut ready = 0;
        let mut errors = Vec::new();
        let mut by_switch = Vec::with_capacity(switches.len());
        for switch_name in switches {
            let switch = match self.stores.switches.get_opt(switch_name).await {
                Ok(Some(switch)) => switch,
                Ok(None) => {
                    warn!("NodeGroup {}: Switch {} not found", group.name_any(), switch_name);
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            let observed = switch.observed_bgp_community();
            if switch.desired_bgp_community() == Some(community) {
                if observed == community {
                    ready += 1;
                }
            } else {
                info!("NodeGroup {}: setting BGP community {} on Switch {}", group.name_any(), community, switch_name);
                let patch = json!({"spec": {"bgp": {"bgpCommunity": community}}});
                if let Err(e) = self
                    .stores
                    .switches
                    .patch(switch_name, &with_resource_version(patch, &switch))
                    .await
                {
                    warn!("NodeGroup {}: failed to update Switch {}: {}", group.name_any(), switch_name, e);
                    errors.push(e);
                }
            }

            by_switch.push(SwitchBgpConfStatus {
                switch_fqdn: switch.spec.fqdn.clone(),
                last_observed_bgp_community: observed,
            });
        }

        let all_ready = ready == switches.len();
        let status = BgpConfigStatus {
            readiness: readiness(ready, switches.len()),
            ready: all_ready,
            last_observed_ready_bgp: if all_ready {
                community
            } else {
                previous.map_or(0, |p| p.bgp_config_status.last_observed_ready_bgp)
            },
            switch_bgp_conf_status: by_switch,
        };
        (status, errors)
    }
}

/// NodeGroup to requeue when a labelled member (NetworkNode or leaf Switch) changes
pub fn node_group_for_member<K>(member: &K) -> Option<ObjectRef<NodeGroup>>
where
    K: ResourceExt,
{
    let group = member.labels().get(LABEL_GROUP_ID).filter(|g| !g.is_empty())?;
    let group_ref = ObjectRef::new(group);
    Some(match member.namespace() {
        Some(namespace) => group_ref.within(&namespace),
        None => group_ref,
    })
}

#[cfg(test)]
#[path = "node_group_test.rs"]
mod node_group_test;
