//! Switch reconciler

use super::{Reconciler, NOT_READY_REQUEUE};
use crate::error::ControllerError;
use crate::events::reasons;
use crds::{Switch, NOOP_BGP_COMMUNITY};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use switch_client::UpdateBgpCommunityRequest;
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_switch(&self, switch: &Switch) -> Result<Action, ControllerError> {
        let name = switch.name_any();

        // Watch events can be stale; act on the stored record
        let switch = match self.stores.switches.get_opt(&name).await? {
            Some(current) if current.meta().deletion_timestamp.is_none() => current,
            _ => {
                info!("Switch {} is gone, releasing its client and reporter", name);
                self.devices.remove_switch(&switch.spec.fqdn);
                self.status_reporter.remove_switch(&switch.spec.fqdn);
                return Ok(Action::await_change());
            }
        };
        let fqdn = switch.spec.fqdn.clone();

        if self.devices.add_or_update_switch(&switch)? {
            debug!("Client for switch {} (re)built", fqdn);
        }
        self.status_reporter.add_switch(&fqdn);

        if switch.spec.maintenance {
            debug!("Switch {} is in maintenance, skipping convergence", fqdn);
            return Ok(Action::requeue(self.config.switch_resync_period));
        }

        let Some(desired) = switch.desired_bgp_community() else {
            return Ok(Action::requeue(self.config.switch_resync_period));
        };
        if desired == NOOP_BGP_COMMUNITY || desired == 0 || desired == switch.observed_bgp_community() {
            return Ok(Action::requeue(self.config.switch_resync_period));
        }

        let Some(client) = self.switch_client(&fqdn) else {
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        };

        info!(
            "Updating BGP community on {} from {} to {}",
            fqdn,
            switch.observed_bgp_community(),
            desired
        );
        let object_ref = switch.object_ref(&());
        match client
            .update_bgp_community(UpdateBgpCommunityRequest {
                switch_fqdn: fqdn.clone(),
                group_name: self.config.bgp_community_group.clone(),
                bgp_community: desired,
            })
            .await
        {
            Ok(()) => {
                self.publish(&object_ref, false, reasons::BGP_UPDATED, format!("bgp community set to {}", desired))
                    .await;
                self.status_reporter.accelerate_status_update(&fqdn);
                Ok(Action::requeue(self.config.switch_resync_period))
            }
            Err(e) => {
                warn!("Failed to update BGP community on {}: {}", fqdn, e);
                self.publish(
                    &object_ref,
                    true,
                    reasons::BGP_UPDATE_FAILED,
                    format!("failed to set bgp community {}: {}", desired, e),
                )
                .await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "switch_test.rs"]
mod switch_test;
