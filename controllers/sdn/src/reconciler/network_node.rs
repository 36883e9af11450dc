//! NetworkNode reconciler
//!
//! A NetworkNode drives the SwitchPort records it is cabled to. Missing
//! records are created with a controller owner reference to the node;
//! an existing record without a controller owner is claimed, and a record
//! owned by another node is left untouched and reported as a conflict.
//!
//! Desired values are written to the SwitchPort spec only. A port counts
//! as ready once its observed status carries every managed value.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::reasons;
use crate::reconcile_helpers::readiness;
use crate::store::with_resource_version;
use crds::{
    port_full_name_to_port_and_switch, Fabric, FabricSwitchPortStatus, FrontEndFabricStatus, MultiPortFabricStatus,
    NetworkNode, NetworkNodeSpec, NetworkNodeStatus, SwitchPort, SwitchPortSpec, SwitchPortStatus, LABEL_FABRIC_TYPE,
    LABEL_NETWORK_NODE, LABEL_SWITCH_FQDN, MODE_ROUTED, MODE_TRUNK, NOOP_PORT_CHANNEL, NOOP_VLAN_ID,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What a NetworkNode wants on one SwitchPort
#[derive(Debug, Clone)]
struct DesiredPort {
    record: String,
    fabric: Fabric,
    mode: String,
    vlan_id: i64,
    native_vlan: i64,
    trunk_groups: Option<Vec<String>>,
}

impl DesiredPort {
    /// Access VLANs are not pushed to trunk or routed ports
    fn manages_vlan(&self) -> bool {
        self.vlan_id != NOOP_VLAN_ID && self.vlan_id != 0 && self.mode != MODE_TRUNK && self.mode != MODE_ROUTED
    }

    fn manages_native_vlan(&self) -> bool {
        self.native_vlan != NOOP_VLAN_ID && self.native_vlan != 0
    }
}

/// Per-port outcome used to build the NetworkNode status
#[derive(Debug, Default)]
struct PortReport {
    observed: SwitchPortStatus,
    ready: bool,
}

fn sorted(groups: &[String]) -> Vec<String> {
    let mut groups = groups.to_vec();
    groups.sort();
    groups
}

fn desired_ports(spec: &NetworkNodeSpec) -> Vec<DesiredPort> {
    let mut ports = Vec::new();
    if let Some(fabric) = &spec.front_end_fabric {
        if !fabric.switch_port.is_empty() {
            ports.push(DesiredPort {
                record: fabric.switch_port.clone(),
                fabric: Fabric::FrontEnd,
                mode: fabric.mode.clone(),
                vlan_id: fabric.vlan_id,
                native_vlan: fabric.native_vlan,
                trunk_groups: fabric.trunk_groups.clone(),
            });
        }
    }
    for (fabric, section) in [
        (Fabric::Accelerator, &spec.accelerator_fabric),
        (Fabric::Storage, &spec.storage_fabric),
    ] {
        let Some(section) = section else { continue };
        for record in section.switch_ports.iter().filter(|p| !p.is_empty()) {
            ports.push(DesiredPort {
                record: record.clone(),
                fabric,
                mode: section.mode.clone(),
                vlan_id: section.vlan_id,
                native_vlan: NOOP_VLAN_ID,
                trunk_groups: None,
            });
        }
    }
    ports
}

fn controller_owner(sp: &SwitchPort) -> Option<&OwnerReference> {
    sp.owner_references().iter().find(|o| o.controller == Some(true))
}

/// Status of a node from the reports of its ports
fn node_status(spec: &NetworkNodeSpec, reports: &BTreeMap<String, PortReport>) -> NetworkNodeStatus {
    let mut status = NetworkNodeStatus::default();

    if let Some(fabric) = spec.front_end_fabric.as_ref().filter(|f| !f.switch_port.is_empty()) {
        let missing = PortReport::default();
        let report = reports.get(&fabric.switch_port).unwrap_or(&missing);
        status.front_end_fabric_status = FrontEndFabricStatus {
            last_observed_vlan_id: report.observed.vlan_id,
            last_observed_mode: report.observed.mode.clone(),
            last_observed_native_vlan: report.observed.native_vlan,
            last_observed_trunk_groups: sorted(&report.observed.trunk_groups),
            readiness: readiness(usize::from(report.ready), 1),
        };
    }

    for (section, target) in [
        (&spec.accelerator_fabric, &mut status.accelerator_fabric_status),
        (&spec.storage_fabric, &mut status.storage_fabric_status),
    ] {
        let Some(section) = section else { continue };
        let ports: Vec<&String> = section.switch_ports.iter().filter(|p| !p.is_empty()).collect();
        let mut ready = 0;
        let mut switch_ports = Vec::with_capacity(ports.len());
        for record in &ports {
            let report = reports.get(*record);
            if report.is_some_and(|r| r.ready) {
                ready += 1;
            }
            let observed = report.map(|r| &r.observed);
            switch_ports.push(FabricSwitchPortStatus {
                switch_port: (*record).clone(),
                last_observed_vlan_id: observed.map_or(0, |o| o.vlan_id),
                last_observed_mode: observed.map(|o| o.mode.clone()).unwrap_or_default(),
            });
        }
        *target = MultiPortFabricStatus {
            switch_ports,
            readiness: readiness(ready, ports.len()),
        };
    }
    status
}

impl Reconciler {
    pub async fn reconcile_network_node(&self, network_node: &NetworkNode) -> Result<Action, ControllerError> {
        let name = network_node.name_any();
        let Some(node) = self.stores.network_nodes.get_opt(&name).await? else {
            debug!("NetworkNode {} not found", name);
            return Ok(Action::await_change());
        };
        if node.meta().deletion_timestamp.is_some() {
            // Owned SwitchPorts are garbage collected through their owner reference
            return Ok(Action::await_change());
        }

        let mut reports = BTreeMap::new();
        let mut errors = Vec::new();
        for port in desired_ports(&node.spec) {
            match self.converge_node_port(&node, &port).await {
                Ok(report) => {
                    reports.insert(port.record.clone(), report);
                }
                Err(e) => {
                    warn!("NetworkNode {}: SwitchPort {} not converged: {}", name, port.record, e);
                    errors.push(e);
                }
            }
        }

        let status = node_status(&node.spec, &reports);
        if node.status.as_ref() != Some(&status) {
            let patch = json!({ "status": serde_json::to_value(&status)? });
            if let Err(e) = self.stores.network_nodes.patch_status(&name, &patch).await {
                errors.push(e);
            }
        }

        ControllerError::from_errors(errors)?;
        Ok(Action::requeue(self.config.network_node_resync_period))
    }

    async fn converge_node_port(&self, node: &NetworkNode, port: &DesiredPort) -> Result<PortReport, ControllerError> {
        let Some(sp) = self.stores.switch_ports.get_opt(&port.record).await? else {
            self.create_node_switch_port(node, port).await?;
            return Ok(PortReport::default());
        };

        let node_ref = node.object_ref(&());
        let claim = match controller_owner(&sp) {
            None => true,
            Some(owner) if node.uid().as_deref() == Some(owner.uid.as_str()) => false,
            Some(owner) => {
                let message = format!(
                    "SwitchPort {} is owned by {} {}",
                    port.record, owner.kind, owner.name
                );
                self.publish(&node_ref, true, reasons::SWITCH_PORT_ALREADY_OWNED, message.clone())
                    .await;
                return Err(ControllerError::OwnershipConflict(message));
            }
        };

        let observed = sp.observed();
        let mut spec = Map::new();
        let mut ready = true;

        if !port.mode.is_empty() {
            if sp.spec.mode != port.mode {
                spec.insert("mode".to_string(), json!(port.mode));
                ready = false;
            } else if observed.mode != port.mode {
                ready = false;
            }
        }

        if port.manages_vlan() {
            if sp.spec.vlan_id != port.vlan_id {
                spec.insert("vlanId".to_string(), json!(port.vlan_id));
                ready = false;
                if port.fabric == Fabric::FrontEnd {
                    self.publish(
                        &node_ref,
                        false,
                        reasons::VLAN_UPDATE,
                        format!("{} vlan {} -> {}", port.record, sp.spec.vlan_id, port.vlan_id),
                    )
                    .await;
                }
            } else if observed.vlan_id != port.vlan_id {
                ready = false;
            }
        }

        if port.manages_native_vlan() {
            if sp.spec.native_vlan != port.native_vlan {
                spec.insert("nativeVlan".to_string(), json!(port.native_vlan));
                ready = false;
            } else if observed.native_vlan != port.native_vlan {
                ready = false;
            }
        }

        match &port.trunk_groups {
            Some(groups) => {
                let wanted = sorted(groups);
                if sp.spec.trunk_groups.as_deref().map(sorted).as_ref() != Some(&wanted) {
                    spec.insert("trunkGroups".to_string(), json!(wanted));
                    ready = false;
                } else if sorted(&observed.trunk_groups) != wanted {
                    ready = false;
                }
            }
            None => {
                if sp.spec.trunk_groups.is_some() {
                    spec.insert("trunkGroups".to_string(), Value::Null);
                }
            }
        }

        let mut metadata = Map::new();
        let mut labels = Map::new();
        for (key, value) in [
            (LABEL_NETWORK_NODE, node.name_any()),
            (LABEL_FABRIC_TYPE, port.fabric.label_value().to_string()),
        ] {
            if sp.labels().get(key) != Some(&value) {
                labels.insert(key.to_string(), Value::String(value));
            }
        }
        if !labels.is_empty() {
            metadata.insert("labels".to_string(), Value::Object(labels));
        }
        if claim {
            info!("NetworkNode {} claims SwitchPort {}", node.name_any(), port.record);
            let mut owners = sp.owner_references().to_vec();
            owners.push(owner_reference(node)?);
            metadata.insert("ownerReferences".to_string(), serde_json::to_value(owners)?);
        }

        if !spec.is_empty() || !metadata.is_empty() {
            let mut patch = Map::new();
            if !spec.is_empty() {
                patch.insert("spec".to_string(), Value::Object(spec));
            }
            if !metadata.is_empty() {
                patch.insert("metadata".to_string(), Value::Object(metadata));
            }
            let patch = with_resource_version(Value::Object(patch), &sp);
            self.stores.switch_ports.patch(&port.record, &patch).await?;
        }

        Ok(PortReport { observed, ready })
    }

    async fn create_node_switch_port(&self, node: &NetworkNode, port: &DesiredPort) -> Result<(), ControllerError> {
        let (port_name, fqdn) = port_full_name_to_port_and_switch(&port.record)?;
        // The switch must be known before ports are managed on it
        self.stores.switches.get(&fqdn).await?;

        let mut spec = SwitchPortSpec::new(
            port_name,
            if port.manages_vlan() { port.vlan_id } else { NOOP_VLAN_ID },
            NOOP_PORT_CHANNEL,
        );
        spec.mode = port.mode.clone();
        spec.native_vlan = port.native_vlan;
        spec.trunk_groups = port.trunk_groups.as_deref().map(sorted);

        let sp = SwitchPort {
            metadata: ObjectMeta {
                name: Some(port.record.clone()),
                namespace: node.namespace(),
                labels: Some(BTreeMap::from([
                    (LABEL_NETWORK_NODE.to_string(), node.name_any()),
                    (LABEL_FABRIC_TYPE.to_string(), port.fabric.label_value().to_string()),
                    (LABEL_SWITCH_FQDN.to_string(), fqdn),
                ])),
                owner_references: Some(vec![owner_reference(node)?]),
                ..Default::default()
            },
            spec,
            status: None,
        };
        info!("Creating SwitchPort {} for NetworkNode {}", port.record, node.name_any());
        self.stores.switch_ports.create(&sp).await?;
        Ok(())
    }
}

fn owner_reference(node: &NetworkNode) -> Result<OwnerReference, ControllerError> {
    node.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::Validation(format!("NetworkNode {} has no uid", node.name_any()))
    })
}

/// NetworkNode to requeue when a SwitchPort changes
pub fn network_node_for_switch_port(sp: &SwitchPort) -> Option<ObjectRef<NetworkNode>> {
    let node = sp.labels().get(LABEL_NETWORK_NODE).filter(|n| !n.is_empty())?;
    let node_ref = ObjectRef::new(node);
    Some(match sp.namespace() {
        Some(namespace) => node_ref.within(&namespace),
        None => node_ref,
    })
}

#[cfg(test)]
#[path = "network_node_test.rs"]
mod network_node_test;
