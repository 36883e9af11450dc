//! SwitchPort reconciler

use super::{Reconciler, NOT_READY_REQUEUE};
use crate::error::ControllerError;
use crate::events::reasons;
use crate::reconcile_helpers::{apply_actions, port_channel_membership_action, switch_port_actions, InterfaceAction};
use crds::{port_channel_record_name, SwitchPort, LABEL_SWITCH_FQDN};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

/// Switch FQDN from the `switch_fqdn` label
pub(crate) fn switch_fqdn_label<K: Resource>(obj: &K) -> Result<String, ControllerError> {
    obj.labels()
        .get(LABEL_SWITCH_FQDN)
        .filter(|fqdn| !fqdn.is_empty())
        .cloned()
        .ok_or_else(|| {
            ControllerError::Validation(format!("{} has no {} label", obj.name_any(), LABEL_SWITCH_FQDN))
        })
}

impl Reconciler {
    /// Whether the Switch record named `fqdn` is in maintenance
    pub(crate) async fn switch_in_maintenance(&self, fqdn: &str) -> Result<bool, ControllerError> {
        Ok(self
            .stores
            .switches
            .get_opt(fqdn)
            .await?
            .is_some_and(|switch| switch.spec.maintenance))
    }

    pub async fn reconcile_switch_port(&self, switch_port: &SwitchPort) -> Result<Action, ControllerError> {
        let name = switch_port.name_any();
        let Some(sp) = self.stores.switch_ports.get_opt(&name).await? else {
            debug!("SwitchPort {} not found", name);
            return Ok(Action::await_change());
        };
        if sp.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        let fqdn = switch_fqdn_label(&sp)?;
        if self.switch_in_maintenance(&fqdn).await? {
            debug!("Switch {} is in maintenance, not touching SwitchPort {}", fqdn, name);
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
        let Some(client) = self.switch_client(&fqdn) else {
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        };

        let observed = sp.observed();
        let mut actions = switch_port_actions(&sp.spec, &observed, false);
        let mut errors = Vec::new();
        let object_ref = sp.object_ref(&());

        if self.config.port_channels_enabled {
            match port_channel_membership_action(sp.spec.port_channel, observed.port_channel) {
                Some(InterfaceAction::AssignPortChannel(number)) => {
                    let record = port_channel_record_name(number, &fqdn)?;
                    if self.stores.port_channels.get_opt(&record).await?.is_some() {
                        actions.push(InterfaceAction::AssignPortChannel(number));
                    } else {
                        let message = format!("PortChannel {} does not exist", record);
                        self.publish(&object_ref, true, reasons::SWITCH_PORT_UPDATE_FAILED, message.clone())
                            .await;
                        errors.push(ControllerError::NotFound(message));
                    }
                }
                Some(action) => actions.push(action),
                None => {}
            }
        }

        if actions.is_empty() && errors.is_empty() {
            debug!("SwitchPort {} is in sync", name);
            return Ok(Action::requeue(self.config.port_resync_period));
        }

        info!("Converging SwitchPort {} on {}: {} change(s)", name, fqdn, actions.len());
        let outcome = apply_actions(client.as_ref(), &fqdn, &sp.spec.name, actions).await;
        for action in &outcome.applied {
            self.publish(
                &object_ref,
                false,
                reasons::SWITCH_PORT_UPDATED,
                format!("{} set to {}", sp.spec.name, action),
            )
            .await;
        }
        for (action, e) in &outcome.failed {
            warn!("SwitchPort {}: {} update failed: {}", name, action.field(), e);
            self.publish(
                &object_ref,
                true,
                reasons::SWITCH_PORT_UPDATE_FAILED,
                format!("failed to set {} on {}: {}", action, sp.spec.name, e),
            )
            .await;
        }
        if !outcome.applied.is_empty() {
            self.status_reporter.accelerate_status_update(&fqdn);
        }

        errors.extend(outcome.failed.into_iter().map(|(_, e)| e));
        ControllerError::from_errors(errors)?;
        Ok(Action::requeue(self.config.port_resync_period))
    }
}

#[cfg(test)]
#[path = "switch_port_test.rs"]
mod switch_port_test;
