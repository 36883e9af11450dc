//! PortChannel reconciler
//!
//! Port-channels discovered on a switch arrive as empty skeletons and are
//! only observed. Once any desired field is set the record is owned: the
//! port-channel is created on the switch if missing, converged like a
//! SwitchPort, and removed from the switch when the record is deleted.

use super::switch_port::switch_fqdn_label;
use super::{Reconciler, AFTER_CREATE_REQUEUE, NOT_READY_REQUEUE};
use crate::error::ControllerError;
use crate::events::reasons;
use crate::reconcile_helpers::{apply_actions, port_channel_actions};
use crate::store::with_resource_version;
use crds::{port_channel_name_to_number, PortChannel, LABEL_SWITCH_FQDN, PORT_CHANNEL_FINALIZER};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use switch_client::{CreatePortChannelRequest, DeletePortChannelRequest};
use tracing::{debug, info, warn};

fn has_finalizer(pc: &PortChannel) -> bool {
    pc.finalizers().iter().any(|f| f == PORT_CHANNEL_FINALIZER)
}

impl Reconciler {
    pub async fn reconcile_port_channel(&self, port_channel: &PortChannel) -> Result<Action, ControllerError> {
        let name = port_channel.name_any();
        let Some(pc) = self.stores.port_channels.get_opt(&name).await? else {
            debug!("PortChannel {} not found", name);
            return Ok(Action::await_change());
        };
        if pc.meta().deletion_timestamp.is_some() {
            return self.finalize_port_channel(&pc).await;
        }

        let pc = self.ensure_port_channel_finalizer(pc).await?;
        let fqdn = switch_fqdn_label(&pc)?;
        if self.switch_in_maintenance(&fqdn).await? {
            debug!("Switch {} is in maintenance, not touching PortChannel {}", fqdn, name);
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
        let Some(client) = self.switch_client(&fqdn) else {
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        };

        let number = port_channel_name_to_number(&pc.spec.name)?;
        let observed = pc.observed();
        let object_ref = pc.object_ref(&());

        if observed.name.is_empty() && pc.spec.is_controller_owned() {
            info!("Creating {} on {}", pc.spec.name, fqdn);
            return match client
                .create_port_channel(CreatePortChannelRequest {
                    switch_fqdn: fqdn.clone(),
                    port_channel: number,
                })
                .await
            {
                Ok(()) => {
                    self.publish(
                        &object_ref,
                        false,
                        reasons::PORT_CHANNEL_UPDATED,
                        format!("created {}", pc.spec.name),
                    )
                    .await;
                    self.status_reporter.accelerate_status_update(&fqdn);
                    Ok(Action::requeue(AFTER_CREATE_REQUEUE))
                }
                Err(e) => {
                    self.publish(
                        &object_ref,
                        true,
                        reasons::PORT_CHANNEL_UPDATE_FAILED,
                        format!("failed to create {}: {}", pc.spec.name, e),
                    )
                    .await;
                    Err(e.into())
                }
            };
        }

        let actions = port_channel_actions(&pc.spec, &observed);
        if actions.is_empty() {
            return Ok(Action::requeue(self.config.port_resync_period));
        }

        let outcome = apply_actions(client.as_ref(), &fqdn, &pc.spec.name, actions).await;
        for action in &outcome.applied {
            self.publish(
                &object_ref,
                false,
                reasons::PORT_CHANNEL_UPDATED,
                format!("{} set to {}", pc.spec.name, action),
            )
            .await;
        }
        for (action, e) in &outcome.failed {
            self.publish(
                &object_ref,
                true,
                reasons::PORT_CHANNEL_UPDATE_FAILED,
                format!("failed to set {} on {}: {}", action, pc.spec.name, e),
            )
            .await;
        }
        if !outcome.applied.is_empty() {
            self.status_reporter.accelerate_status_update(&fqdn);
        }
        outcome.into_result()?;
        Ok(Action::requeue(self.config.port_resync_period))
    }

    async fn ensure_port_channel_finalizer(&self, pc: PortChannel) -> Result<PortChannel, ControllerError> {
        if has_finalizer(&pc) {
            return Ok(pc);
        }
        let mut finalizers = pc.finalizers().to_vec();
        finalizers.push(PORT_CHANNEL_FINALIZER.to_string());
        let patch = with_resource_version(json!({"metadata": {"finalizers": finalizers}}), &pc);
        self.stores.port_channels.patch(&pc.name_any(), &patch).await
    }

    async fn finalize_port_channel(&self, pc: &PortChannel) -> Result<Action, ControllerError> {
        let name = pc.name_any();
        if !has_finalizer(pc) {
            return Ok(Action::await_change());
        }
        let fqdn = pc.labels().get(LABEL_SWITCH_FQDN).cloned().unwrap_or_default();

        if pc.spec.is_controller_owned() {
            let fqdn = switch_fqdn_label(pc)?;
            if self.switch_in_maintenance(&fqdn).await? {
                debug!("Switch {} is in maintenance, keeping {} until it is back", fqdn, pc.spec.name);
                return Ok(Action::requeue(NOT_READY_REQUEUE));
            }
            let Some(client) = self.switch_client(&fqdn) else {
                return Ok(Action::requeue(NOT_READY_REQUEUE));
            };
            let number = port_channel_name_to_number(&pc.spec.name)?;

            let selector = format!("{}={}", LABEL_SWITCH_FQDN, fqdn);
            for sp in self.stores.switch_ports.list(Some(&selector)).await? {
                if sp.spec.port_channel != number {
                    continue;
                }
                debug!("Detaching SwitchPort {} from {}", sp.name_any(), pc.spec.name);
                let patch = with_resource_version(json!({"spec": {"portChannel": 0}}), &sp);
                self.stores.switch_ports.patch(&sp.name_any(), &patch).await?;
            }

            info!("Deleting {} from {}", pc.spec.name, fqdn);
            if let Err(e) = client
                .delete_port_channel(DeletePortChannelRequest {
                    switch_fqdn: fqdn.clone(),
                    port_channel: number,
                })
                .await
            {
                warn!("Failed to delete {} from {}: {}", pc.spec.name, fqdn, e);
                self.publish(
                    &pc.object_ref(&()),
                    true,
                    reasons::PORT_CHANNEL_UPDATE_FAILED,
                    format!("failed to delete {}: {}", pc.spec.name, e),
                )
                .await;
                return Err(e.into());
            }
        }

        let finalizers: Vec<String> = pc
            .finalizers()
            .iter()
            .filter(|f| *f != PORT_CHANNEL_FINALIZER)
            .cloned()
            .collect();
        let patch = with_resource_version(json!({"metadata": {"finalizers": finalizers}}), pc);
        self.stores.port_channels.patch(&name, &patch).await?;
        if !fqdn.is_empty() {
            self.status_reporter.accelerate_status_update(&fqdn);
        }
        Ok(Action::await_change())
    }
}

#[cfg(test)]
#[path = "port_channel_test.rs"]
mod port_channel_test;
