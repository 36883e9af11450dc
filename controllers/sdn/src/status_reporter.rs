//! Status Reporter
//!
//! One worker per switch polls the live interface, port-channel and BGP
//! state and writes it back as observed status on the Switch, SwitchPort
//! and PortChannel records. Writes only happen when something changed.
//!
//! `accelerate_status_update` asks a worker for one extra pass shortly
//! after a write. At most one accelerated pass is pending per switch.

use crate::devices_manager::DevicesAccessManager;
use crate::error::ControllerError;
use crate::events::{actions, reasons, EventPublisher};
use crate::store::{with_resource_version, Stores};
use chrono::{DateTime, Utc};
use crds::{
    is_port_channel_name, port_channel_name_to_number, port_channel_record_name, PortChannel, PortChannelSpec,
    PortChannelStatus, Switch, SwitchBgpConfigStatus, SwitchPortStatus, LABEL_SWITCH_FQDN,
    NOOP_BGP_COMMUNITY, NOOP_VLAN_ID,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use switch_client::{GetBgpCommunityRequest, GetSwitchPortsRequest, PortStatus, SwitchClientError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Single pending accelerated pass
#[derive(Default)]
struct AccelerateSlot {
    pending: AtomicBool,
    notify: Notify,
}

struct Worker {
    cancel: CancellationToken,
    accelerate: Arc<AccelerateSlot>,
    _handle: JoinHandle<()>,
}

/// Reporter settings
#[derive(Debug, Clone)]
pub struct StatusReporterConfig {
    pub period: Duration,
    pub accelerated_period: Duration,
    pub bgp_community_group: String,
    pub port_channels_enabled: bool,
}

/// Per-switch workers copying live switch state into record statuses.
///
/// Workers are started by the Switch reconciler and retired once their
/// Switch record is gone.
pub struct StatusReporter {
    config: StatusReporterConfig,
    stores: Stores,
    devices: Arc<DevicesAccessManager>,
    events: Arc<dyn EventPublisher>,
    workers: Mutex<HashMap<String, Worker>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn initial_delay(period: Duration) -> Duration {
    let max = period.as_millis().max(1);
    let millis = rand::thread_rng().gen_range(0..max);
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

impl StatusReporter {
    pub fn new(
        config: StatusReporterConfig,
        stores: Stores,
        devices: Arc<DevicesAccessManager>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            stores,
            devices,
            events,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a worker for `fqdn`. Returns false if one is already running.
    pub fn add_switch(self: &Arc<Self>, fqdn: &str) -> bool {
        let mut workers = lock(&self.workers);
        if workers.contains_key(fqdn) {
            return false;
        }

        let cancel = CancellationToken::new();
        let accelerate = Arc::new(AccelerateSlot::default());
        let handle = {
            let reporter = Arc::clone(self);
            let fqdn = fqdn.to_string();
            let cancel = cancel.clone();
            let accelerate = Arc::clone(&accelerate);
            tokio::spawn(async move { reporter.run_worker(fqdn, cancel, accelerate).await })
        };
        workers.insert(
            fqdn.to_string(),
            Worker {
                cancel,
                accelerate,
                _handle: handle,
            },
        );
        info!("Started status reporter for switch {}", fqdn);
        true
    }

    pub fn remove_switch(&self, fqdn: &str) {
        if let Some(worker) = lock(&self.workers).remove(fqdn) {
            worker.cancel.cancel();
            info!("Stopped status reporter for switch {}", fqdn);
        }
    }

    #[cfg(test)]
    pub fn has_switch(&self, fqdn: &str) -> bool {
        lock(&self.workers).contains_key(fqdn)
    }

    /// Stops every worker
    pub fn shutdown(&self) {
        for (_, worker) in lock(&self.workers).drain() {
            worker.cancel.cancel();
        }
    }

    /// Schedules one early pass for `fqdn`.
    /// Returns false when a pass is already pending or no worker runs for the switch.
    pub fn accelerate_status_update(&self, fqdn: &str) -> bool {
        let Some(slot) = lock(&self.workers).get(fqdn).map(|w| Arc::clone(&w.accelerate)) else {
            return false;
        };
        if slot
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        debug!("Accelerated status update scheduled for {}", fqdn);
        slot.notify.notify_one();
        true
    }

    async fn run_worker(&self, fqdn: String, cancel: CancellationToken, accelerate: Arc<AccelerateSlot>) {
        let mut next_tick = tokio::time::Instant::now() + initial_delay(self.config.period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep_until(next_tick) => {
                    self.logged_pass(&fqdn).await;
                    next_tick = tokio::time::Instant::now() + self.config.period;
                }
                () = accelerate.notify.notified() => {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(self.config.accelerated_period) => {}
                    }
                    accelerate.pending.store(false, Ordering::SeqCst);
                    self.logged_pass(&fqdn).await;
                }
            }
        }
    }

    async fn logged_pass(&self, fqdn: &str) {
        if let Err(e) = self.run_pass(fqdn).await {
            if e.is_not_found() && matches!(self.stores.switches.get_opt(fqdn).await, Ok(None)) {
                info!("Switch {} no longer exists, retiring its status reporter", fqdn);
                self.devices.remove_switch(fqdn);
                self.remove_switch(fqdn);
            } else if e.is_store_conflict() {
                debug!("Status pass for {} hit a write conflict, retrying next tick", fqdn);
            } else {
                warn!("Status pass for {} failed: {}", fqdn, e);
            }
        }
    }

    async fn warn_switch(&self, switch: &Switch, note: String) {
        self.events
            .publish(
                &switch.object_ref(&()),
                EventType::Warning,
                reasons::STATUS_REPORT_FAILED,
                actions::REPORT_STATUS,
                Some(note),
            )
            .await;
    }

    /// One status pass for a switch.
    ///
    /// The Switch status and the port statuses are updated independently:
    /// a failed read of one side leaves the other side's update alone.
    pub async fn run_pass(&self, fqdn: &str) -> Result<(), ControllerError> {
        let switch = self.stores.switches.get(fqdn).await?;

        let client = match self.devices.get_switch_client(fqdn) {
            Ok(client) => client,
            Err(e) => {
                self.warn_switch(&switch, e.to_string()).await;
                return Err(e);
            }
        };

        let mut accelerate = false;
        let mut errors = Vec::new();

        let observed_bgp = match client
            .get_bgp_community(GetBgpCommunityRequest {
                switch_fqdn: fqdn.to_string(),
                group_name: self.config.bgp_community_group.clone(),
            })
            .await
        {
            Ok(community) => Ok(Some(community)),
            // The switch answered, it just has no community to report
            Err(SwitchClientError::NotFound(msg)) => {
                debug!("No BGP community on {}: {}", fqdn, msg);
                Ok(None)
            }
            Err(SwitchClientError::Serialization(e)) => {
                debug!("Unreadable BGP community from {}: {}", fqdn, e);
                Ok(None)
            }
            Err(e) => Err(e),
        };
        match observed_bgp {
            Ok(observed_bgp) => {
                if let (Some(observed), Some(desired)) = (observed_bgp, switch.desired_bgp_community()) {
                    if desired != NOOP_BGP_COMMUNITY && desired != observed {
                        accelerate = true;
                    }
                }
                if let Err(e) = self.write_switch_status(&switch, observed_bgp).await {
                    errors.push(e);
                }
            }
            Err(e) => {
                // Switch unreachable: lastStatusUpdateTime must not advance
                warn!("Failed to read BGP community from {}: {}", fqdn, e);
                self.warn_switch(&switch, format!("failed to read BGP community: {}", e)).await;
                errors.push(e.into());
            }
        }

        match client
            .get_switch_ports(GetSwitchPortsRequest {
                switch_fqdn: fqdn.to_string(),
            })
            .await
        {
            Ok(live) => {
                let known_ports = match self.report_switch_ports(fqdn, &live).await {
                    Ok((known, changed)) => {
                        accelerate |= changed;
                        known
                    }
                    Err(e) => {
                        errors.push(e);
                        HashSet::new()
                    }
                };

                if self.config.port_channels_enabled {
                    if let Err(e) = self.report_port_channels(fqdn, &live, &known_ports).await {
                        errors.push(e);
                    }
                }
            }
            Err(e) => {
                self.warn_switch(&switch, format!("failed to read ports: {}", e)).await;
                errors.push(e.into());
            }
        }

        if accelerate {
            self.accelerate_status_update(fqdn);
        }
        ControllerError::from_errors(errors)
    }

    async fn write_switch_status(&self, switch: &Switch, observed_bgp: Option<i64>) -> Result<(), ControllerError> {
        let mut status = json!({ "lastStatusUpdateTime": Utc::now().to_rfc3339() });
        if let Some(observed) = observed_bgp.filter(|c| *c != 0) {
            status["switchBgpConfigStatus"] = serde_json::to_value(SwitchBgpConfigStatus {
                last_observed_bgp_community: observed,
            })?;
        }
        self.stores
            .switches
            .patch_status(&switch.name_any(), &json!({ "status": status }))
            .await?;
        Ok(())
    }

    /// Copies live state onto SwitchPort records.
    /// Returns the interface names that have a record and whether any status changed.
    async fn report_switch_ports(
        &self,
        fqdn: &str,
        live: &HashMap<String, PortStatus>,
    ) -> Result<(HashSet<String>, bool), ControllerError> {
        let selector = format!("{}={}", LABEL_SWITCH_FQDN, fqdn);
        let records = self.stores.switch_ports.list(Some(&selector)).await?;

        let mut known = HashSet::new();
        let mut changed = false;
        let mut errors = Vec::new();

        for sp in records {
            known.insert(sp.spec.name.clone());
            let Some(port) = live.get(&sp.spec.name) else {
                debug!("Port {} not reported by {}", sp.spec.name, fqdn);
                continue;
            };
            let current = sp.observed();

            if sp.spec.vlan_id != NOOP_VLAN_ID
                && sp.spec.vlan_id != 0
                && sp.spec.vlan_id == current.vlan_id
                && port.vlan_id != 0
                && port.vlan_id != current.vlan_id
            {
                self.events
                    .publish(
                        &sp.object_ref(&()),
                        EventType::Warning,
                        reasons::UNEXPECTED_VLAN,
                        actions::REPORT_STATUS,
                        Some(format!(
                            "{} on {} reports vlan {}, expected {}",
                            sp.spec.name, fqdn, port.vlan_id, sp.spec.vlan_id
                        )),
                    )
                    .await;
            }

            let mut next = switch_port_status(port, current.last_status_change_time);
            if next == current {
                continue;
            }
            next.last_status_change_time = Some(Utc::now());
            let patch = with_resource_version(json!({ "status": serde_json::to_value(&next)? }), &sp);
            match self.stores.switch_ports.patch_status(&sp.name_any(), &patch).await {
                Ok(_) => changed = true,
                Err(e) => errors.push(e),
            }
        }

        ControllerError::from_errors(errors)?;
        Ok((known, changed))
    }

    async fn report_port_channels(
        &self,
        fqdn: &str,
        live: &HashMap<String, PortStatus>,
        known_ports: &HashSet<String>,
    ) -> Result<(), ControllerError> {
        // Port-channels with a member we don't manage belong to someone else
        let not_controlled: HashSet<i64> = live
            .iter()
            .filter(|(name, port)| !is_port_channel_name(name) && !known_ports.contains(*name) && port.port_channel > 0)
            .map(|(_, port)| port.port_channel)
            .collect();

        let selector = format!("{}={}", LABEL_SWITCH_FQDN, fqdn);
        let records: HashMap<String, PortChannel> = self
            .stores
            .port_channels
            .list(Some(&selector))
            .await?
            .into_iter()
            .map(|pc| (pc.spec.name.clone(), pc))
            .collect();

        let mut errors = Vec::new();

        for (name, port) in live.iter().filter(|(name, _)| is_port_channel_name(name)) {
            let number = match port_channel_name_to_number(name) {
                Ok(n) => n,
                Err(e) => {
                    warn!("Skipping {} on {}: {}", name, fqdn, e);
                    continue;
                }
            };

            let result = match records.get(name) {
                Some(pc) => self.write_port_channel_status(pc, port).await,
                None if not_controlled.contains(&number) => {
                    debug!("{} on {} has unmanaged members, not creating a record", name, fqdn);
                    Ok(())
                }
                None => self.create_port_channel_record(fqdn, number, port).await,
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }

        for (name, pc) in &records {
            if live.contains_key(name) || pc.observed() == PortChannelStatus::default() {
                continue;
            }
            info!("{} no longer exists on {}, clearing status", name, fqdn);
            let mut cleared = serde_json::to_value(PortChannelStatus::default())?;
            cleared["lastStatusChangeTime"] = Value::Null;
            let patch = with_resource_version(json!({ "status": cleared }), pc);
            if let Err(e) = self.stores.port_channels.patch_status(&pc.name_any(), &patch).await {
                errors.push(e);
            }
        }

        ControllerError::from_errors(errors)
    }

    async fn create_port_channel_record(&self, fqdn: &str, number: i64, port: &PortStatus) -> Result<(), ControllerError> {
        let record_name = port_channel_record_name(number, fqdn)?;
        info!("Discovered {} on {}, creating PortChannel {}", port.name, fqdn, record_name);
        let pc = PortChannel {
            metadata: ObjectMeta {
                name: Some(record_name),
                labels: Some(BTreeMap::from([(LABEL_SWITCH_FQDN.to_string(), fqdn.to_string())])),
                ..Default::default()
            },
            spec: PortChannelSpec::skeleton(port.name.clone()),
            status: None,
        };
        let created = self.stores.port_channels.create(&pc).await?;
        self.write_port_channel_status(&created, port).await
    }

    async fn write_port_channel_status(&self, pc: &PortChannel, port: &PortStatus) -> Result<(), ControllerError> {
        let current = pc.observed();
        let mut next = port_channel_status(port, current.last_status_change_time);
        if next == current {
            return Ok(());
        }
        next.last_status_change_time = Some(Utc::now());
        let patch = with_resource_version(json!({ "status": serde_json::to_value(&next)? }), pc);
        self.stores.port_channels.patch_status(&pc.name_any(), &patch).await?;
        Ok(())
    }
}

fn sorted(groups: &[String]) -> Vec<String> {
    let mut groups = groups.to_vec();
    groups.sort();
    groups
}

pub(crate) fn switch_port_status(port: &PortStatus, last_change: Option<DateTime<Utc>>) -> SwitchPortStatus {
    SwitchPortStatus {
        name: port.name.clone(),
        mode: port.mode.clone(),
        vlan_id: port.vlan_id,
        description: port.description.clone(),
        native_vlan: port.native_vlan,
        trunk_groups: sorted(&port.trunk_groups),
        port_channel: port.port_channel,
        link_status: port.link_status.clone(),
        line_protocol_status: port.line_protocol_status.clone(),
        bandwidth: port.bandwidth,
        duplex: port.duplex.clone(),
        interface_type: port.interface_type.clone(),
        switch_side_last_status_change_timestamp: port.last_status_change_timestamp,
        last_status_change_time: last_change,
    }
}

pub(crate) fn port_channel_status(port: &PortStatus, last_change: Option<DateTime<Utc>>) -> PortChannelStatus {
    PortChannelStatus {
        name: port.name.clone(),
        mode: port.mode.clone(),
        vlan_id: port.vlan_id,
        description: port.description.clone(),
        native_vlan: port.native_vlan,
        trunk_groups: sorted(&port.trunk_groups),
        link_status: port.link_status.clone(),
        line_protocol_status: port.line_protocol_status.clone(),
        bandwidth: port.bandwidth,
        duplex: port.duplex.clone(),
        interface_type: port.interface_type.clone(),
        switch_side_last_status_change_timestamp: port.last_status_change_timestamp,
        last_status_change_time: last_change,
    }
}

#[cfg(test)]
#[path = "status_reporter_test.rs"]
mod status_reporter_test;
