//! Pool Manager
//!
//! Moves NodeGroups between pools. A migration runs in steps:
//!
//! 1. lock the NodeGroup (`maintenance=inProgress`)
//! 2. reset every member NetworkNode and leaf Switch to the target pool's
//!    defaults, status first so stale readiness never looks converged
//! 3. rewrite the NodeGroup's own fabric policy
//! 4. flip `pool` and set `maintenance=waitingForReady`
//!
//! Later passes release the lock once the group reports the pool defaults
//! as observed. A failed step leaves the lock in place and returns
//! [`MigrationStatus::Failed`]; nothing is rolled back.

pub mod readers;
pub mod usage;

pub use readers::*;
pub use usage::*;

use crate::error::ControllerError;
use crate::events::{actions, reasons, EventPublisher};
use crate::store::{with_resource_version, Stores};
use crds::{
    FabricConfig, FabricStrategy, NodeGroup, Pool, SchedulableUnit, VlanConfig, BgpConfig, Fabric,
    LABEL_MAINTENANCE, LABEL_POOL, MAINTENANCE_IN_PROGRESS, MAINTENANCE_WAITING_FOR_READY,
    NOOP_BGP_COMMUNITY, NOOP_VLAN_ID,
};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time between two polls of the mapping source
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Moves NodeGroups between Pools.
///
/// Each mapping change is applied one step at a time: lock the group, reset
/// its members to the target Pool's defaults, then wait until they report
/// those defaults before releasing the lock.
pub struct PoolManager {
    stores: Stores,
    pools: Arc<dyn PoolConfigReader>,
    mappings: Arc<dyn PoolMappingReader>,
    usage: Arc<dyn NodeUsageReporter>,
    events: Arc<dyn EventPublisher>,
    use_pool_defaults: bool,
}

pub(crate) fn network_node_fabric_key(fabric: Fabric) -> &'static str {
    match fabric {
        Fabric::FrontEnd => "frontEndFabric",
        Fabric::Accelerator => "acceleratorFabric",
        Fabric::Storage => "storageFabric",
    }
}

fn network_node_status_key(fabric: Fabric) -> &'static str {
    match fabric {
        Fabric::FrontEnd => "frontEndFabricStatus",
        Fabric::Accelerator => "acceleratorFabricStatus",
        Fabric::Storage => "storageFabricStatus",
    }
}

fn node_group_config_key(fabric: Fabric) -> &'static str {
    match fabric {
        Fabric::FrontEnd => "frontEndFabricConfig",
        Fabric::Accelerator => "acceleratorFabricConfig",
        Fabric::Storage => "storageFabricConfig",
    }
}

/// Merge-patch value replacing a fabric config. Absent parts become
/// explicit nulls so stale values are removed rather than merged.
fn fabric_config_patch(config: Option<&FabricConfig>) -> Result<Value, ControllerError> {
    Ok(match config {
        None => Value::Null,
        Some(config) => json!({
            "vlanConf": serde_json::to_value(&config.vlan_conf)?,
            "bgpConf": serde_json::to_value(&config.bgp_conf)?,
        }),
    })
}

/// `maintenance` label value, empty when unset
fn maintenance_of(group: &NodeGroup) -> &str {
    group
        .labels()
        .get(LABEL_MAINTENANCE)
        .map(String::as_str)
        .unwrap_or_default()
}

fn pool_of(group: &NodeGroup) -> &str {
    group.labels().get(LABEL_POOL).map(String::as_str).unwrap_or_default()
}

impl PoolManager {
    pub fn new(
        stores: Stores,
        pools: Arc<dyn PoolConfigReader>,
        mappings: Arc<dyn PoolMappingReader>,
        usage: Arc<dyn NodeUsageReporter>,
        events: Arc<dyn EventPublisher>,
        use_pool_defaults: bool,
    ) -> Self {
        Self {
            stores,
            pools,
            mappings,
            usage,
            events,
            use_pool_defaults,
        }
    }

    /// Drives mapping changes until cancelled. Uses the event stream when
    /// the mapping source offers one, polling otherwise.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        match self.mappings.watch_group_to_pool_mappings() {
            Some(rx) => {
                info!("Pool manager consuming mapping events");
                self.run_with_watch(rx, cancel).await
            }
            None => {
                info!("Pool manager polling mappings every {}s", DEFAULT_POLL_INTERVAL.as_secs());
                self.run_with_poll(cancel).await
            }
        }
    }

    async fn run_with_watch(
        &self,
        mut rx: mpsc::Receiver<MappingEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ControllerError> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => return Err(ControllerError::Watch("pool mapping event stream closed".to_string())),
                },
            }
        }
    }

    async fn run_with_poll(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        loop {
            let wait = match self.poll_once().await {
                Ok(()) => DEFAULT_POLL_INTERVAL,
                Err(e) => {
                    warn!("Pool mapping poll failed: {}", e);
                    POLL_RETRY_DELAY
                }
            };
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Reconciles every NodeGroup against the current mapping. Groups
    /// without a mapping entry are treated as unmapped.
    pub async fn poll_once(&self) -> Result<(), ControllerError> {
        let mappings = self.mappings.get_group_to_pool_mappings().await?;
        let groups = self.stores.node_groups.list(None).await?;
        for group in groups {
            let target = mappings.get(&group.name_any()).map(String::as_str).unwrap_or_default();
            match self.reconcile_group_pool_mapping(&group, target).await {
                Ok(status) => debug!("NodeGroup {} pool mapping: {:?}", group.name_any(), status),
                Err(e) => warn!("NodeGroup {} pool mapping failed: {}", group.name_any(), e),
            }
        }
        Ok(())
    }

    /// Answers one mapping event. Sending on the oneshot never blocks.
    pub async fn handle_event(&self, event: MappingEvent) {
        let result = self.process_mapping(&event.node_group, &event.pool).await;
        if event.response.send(result).is_err() {
            warn!("Nobody waiting for the pool mapping answer of NodeGroup {}", event.node_group);
        }
    }

    async fn process_mapping(&self, node_group: &str, pool: &str) -> MappingResult {
        let group = match self.stores.node_groups.get_opt(node_group).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                debug!("NodeGroup {} not found, ignoring pool mapping", node_group);
                return MappingResult {
                    status: MigrationStatus::NoOp,
                    error: None,
                };
            }
            Err(e) => return MappingResult::failed(e.to_string()),
        };
        match self.reconcile_group_pool_mapping(&group, pool).await {
            Ok(status) => MappingResult { status, error: None },
            Err(e) => MappingResult::failed(e.to_string()),
        }
    }

    /// Advances the migration of `group` towards `target_pool` by one step.
    /// An `Err` is a [`MigrationStatus::Failed`] step.
    pub async fn reconcile_group_pool_mapping(
        &self,
        group: &NodeGroup,
        target_pool: &str,
    ) -> Result<MigrationStatus, ControllerError> {
        let result = self.step(group, target_pool).await;
        match &result {
            Ok(MigrationStatus::Success) => {
                self.publish(
                    group,
                    EventType::Normal,
                    reasons::POOL_MIGRATION_COMPLETED,
                    format!("NodeGroup converged to pool {}", target_pool),
                )
                .await;
            }
            Err(e) => {
                error!("Pool migration of NodeGroup {} to [{}] failed: {}", group.name_any(), target_pool, e);
                self.publish(group, EventType::Warning, reasons::POOL_MIGRATION_FAILED, e.to_string())
                    .await;
            }
            Ok(_) => {}
        }
        result
    }

    async fn publish(&self, group: &NodeGroup, type_: EventType, reason: &str, note: String) {
        self.events
            .publish(&group.object_ref(&()), type_, reason, actions::MIGRATE, Some(note))
            .await;
    }

    async fn step(&self, group: &NodeGroup, target_pool: &str) -> Result<MigrationStatus, ControllerError> {
        let name = group.name_any();
        let current_pool = pool_of(group);
        let maintenance = maintenance_of(group);

        if current_pool == target_pool && maintenance.is_empty() {
            return Ok(MigrationStatus::NoOp);
        }

        if target_pool.is_empty() {
            info!("NodeGroup {} is no longer mapped to a pool", name);
            self.update_labels(&name, &[(LABEL_POOL, None), (LABEL_MAINTENANCE, None)])
                .await?;
            return Ok(MigrationStatus::NoOp);
        }

        let pool = self.pools.get_pool_by_name(target_pool).await?;
        if pool.network_config_strategy.is_none() {
            return Err(ControllerError::Validation(format!(
                "pool {} has no network config strategy",
                pool.name
            )));
        }

        if current_pool != target_pool {
            return self.migrate(group, current_pool, &pool).await;
        }

        if self.is_node_group_in_default_state(group, &pool).await {
            info!("NodeGroup {} reached the defaults of pool {}", name, pool.name);
            self.update_labels(&name, &[(LABEL_MAINTENANCE, None)]).await?;
            Ok(MigrationStatus::Success)
        } else {
            debug!("NodeGroup {} still converging to pool {}", name, pool.name);
            Ok(MigrationStatus::InProgress)
        }
    }

    async fn migrate(
        &self,
        group: &NodeGroup,
        current_pool: &str,
        pool: &Pool,
    ) -> Result<MigrationStatus, ControllerError> {
        let name = group.name_any();
        info!("Moving NodeGroup {} from pool [{}] to [{}]", name, current_pool, pool.name);

        self.ensure_available(group).await?;
        ensure_fits(group, pool)?;

        self.update_labels(&name, &[(LABEL_MAINTENANCE, Some(MAINTENANCE_IN_PROGRESS))])
            .await?;
        self.publish(
            group,
            EventType::Normal,
            reasons::POOL_MIGRATION_STARTED,
            format!("Moving from pool [{}] to [{}]", current_pool, pool.name),
        )
        .await;

        let mut errors = Vec::new();
        for node in &group.spec.network_nodes {
            if let Err(e) = self.update_network_node(node, pool).await {
                warn!("Failed to reset NetworkNode {} for pool {}: {}", node, pool.name, e);
                errors.push(e);
            }
        }
        for fabric in Fabric::ALL {
            let strategy = pool.fabric_strategy(fabric);
            for switch in group.spec.leaf_switches(fabric) {
                if let Err(e) = self.update_switch(switch, strategy).await {
                    warn!("Failed to reset Switch {} for pool {}: {}", switch, pool.name, e);
                    errors.push(e);
                }
            }
        }
        ControllerError::from_errors(errors)?;

        self.update_node_group(&name, pool).await?;
        self.update_labels(
            &name,
            &[
                (LABEL_MAINTENANCE, Some(MAINTENANCE_WAITING_FOR_READY)),
                (LABEL_POOL, Some(pool.name.as_str())),
            ],
        )
        .await?;

        info!("NodeGroup {} moved to pool {}, waiting for readiness", name, pool.name);
        Ok(MigrationStatus::InProgress)
    }

    /// Nodes in use must not be moved
    async fn ensure_available(&self, group: &NodeGroup) -> Result<(), ControllerError> {
        for node in &group.spec.network_nodes {
            if self.usage.is_node_reserved(node).await {
                return Err(ControllerError::Validation(format!(
                    "NodeGroup {} cannot move: NetworkNode {} is in use",
                    group.name_any(),
                    node
                )));
            }
        }
        Ok(())
    }

    /// Sets or removes labels on the latest copy of a NodeGroup
    async fn update_labels(&self, name: &str, labels: &[(&str, Option<&str>)]) -> Result<(), ControllerError> {
        let group = self.stores.node_groups.get(name).await?;
        let mut changes = Map::new();
        for (key, value) in labels {
            let current = group.labels().get(*key).map(String::as_str);
            if current == *value {
                continue;
            }
            changes.insert((*key).to_string(), value.map_or(Value::Null, |v| Value::String(v.to_string())));
        }
        if changes.is_empty() {
            return Ok(());
        }
        let patch = with_resource_version(json!({"metadata": {"labels": changes}}), &group);
        self.stores.node_groups.patch(name, &patch).await?;
        Ok(())
    }

    /// Resets one member NetworkNode to the pool defaults. Fabrics the
    /// pool gives no default VLAN go back to VLAN 0.
    async fn update_network_node(&self, name: &str, pool: &Pool) -> Result<(), ControllerError> {
        let node = self.stores.network_nodes.get(name).await?;
        let per_node = pool.schedulable_unit() == SchedulableUnit::NetworkNode;

        let mut spec_patch = Map::new();
        let mut status_patch = Map::new();
        for fabric in Fabric::ALL {
            if node.spec.fabric_vlan(fabric).is_none() {
                continue;
            }
            match pool.fabric_strategy(fabric).and_then(FabricStrategy::default_vlan_id) {
                Some(default) => {
                    if per_node {
                        let vlan = if self.use_pool_defaults { default } else { NOOP_VLAN_ID };
                        spec_patch.insert(network_node_fabric_key(fabric).to_string(), json!({"vlanId": vlan}));
                    }
                }
                None => {
                    spec_patch.insert(network_node_fabric_key(fabric).to_string(), json!({"vlanId": 0}));
                    let mut cleared = node.status.clone().unwrap_or_default();
                    cleared.clear_fabric(fabric);
                    let value = serde_json::to_value(&cleared)?;
                    if let Some(fabric_status) = value.get(network_node_status_key(fabric)) {
                        status_patch.insert(network_node_status_key(fabric).to_string(), fabric_status.clone());
                    }
                }
            }
        }

        if !status_patch.is_empty() {
            self.stores
                .network_nodes
                .patch_status(name, &json!({"status": status_patch}))
                .await?;
        }
        if !spec_patch.is_empty() {
            self.stores
                .network_nodes
                .patch(name, &json!({"spec": spec_patch}))
                .await?;
        }
        debug!("NetworkNode {} reset for pool {}", name, pool.name);
        Ok(())
    }

    /// Resets one leaf Switch's BGP community to the fabric default, or
    /// stops managing BGP when the fabric has none.
    async fn update_switch(&self, name: &str, strategy: Option<&FabricStrategy>) -> Result<(), ControllerError> {
        self.stores.switches.get(name).await?;
        let bgp = strategy
            .and_then(FabricStrategy::default_bgp_community)
            .map(|bgp_community| BgpConfig { bgp_community });

        if bgp.is_none() {
            self.stores
                .switches
                .patch_status(name, &json!({"status": {"switchBgpConfigStatus": null}}))
                .await?;
        }
        self.stores
            .switches
            .patch(name, &json!({"spec": {"bgp": serde_json::to_value(&bgp)?}}))
            .await?;
        debug!("Switch {} BGP reset to {:?}", name, bgp);
        Ok(())
    }

    /// Group-level policy a NodeGroup gets in `pool`
    fn node_group_template(&self, pool: &Pool, fabric: Fabric) -> Option<FabricConfig> {
        if pool.schedulable_unit() == SchedulableUnit::NetworkNode {
            return None;
        }
        let strategy = pool.fabric_strategy(fabric)?;
        let pick = |default: Option<i64>, noop: i64| default.map(|v| if self.use_pool_defaults { v } else { noop });
        Some(FabricConfig {
            vlan_conf: pick(strategy.default_vlan_id(), NOOP_VLAN_ID).map(|vlan_id| VlanConfig { vlan_id }),
            bgp_conf: pick(strategy.default_bgp_community(), NOOP_BGP_COMMUNITY)
                .map(|bgp_community| BgpConfig { bgp_community }),
        })
    }

    async fn update_node_group(&self, name: &str, pool: &Pool) -> Result<(), ControllerError> {
        let status_reset = json!({"status": {
            "frontEndFabricStatus": null,
            "acceleratorFabricStatus": null,
            "storageFabricStatus": null,
        }});
        self.stores.node_groups.patch_status(name, &status_reset).await?;

        let mut spec_patch = Map::new();
        for fabric in Fabric::ALL {
            let template = self.node_group_template(pool, fabric);
            spec_patch.insert(
                node_group_config_key(fabric).to_string(),
                fabric_config_patch(template.as_ref())?,
            );
        }
        self.stores
            .node_groups
            .patch(name, &json!({"spec": spec_patch}))
            .await?;
        Ok(())
    }

    /// Whether every member reports the pool defaults as observed
    pub async fn is_node_group_in_default_state(&self, group: &NodeGroup, pool: &Pool) -> bool {
        match pool.schedulable_unit() {
            SchedulableUnit::NodeGroup => node_group_converged(group, pool),
            SchedulableUnit::NetworkNode => {
                for node in &group.spec.network_nodes {
                    if !self.network_node_converged(node, pool).await {
                        return false;
                    }
                }
                true
            }
        }
    }

    async fn network_node_converged(&self, name: &str, pool: &Pool) -> bool {
        let node = match self.stores.network_nodes.get(name).await {
            Ok(node) => node,
            Err(e) => {
                warn!("Cannot check NetworkNode {}: {}", name, e);
                return false;
            }
        };
        let status = node.status.clone().unwrap_or_default();

        for fabric in Fabric::ALL {
            let Some(strategy) = pool.fabric_strategy(fabric) else {
                continue;
            };
            let Some(vlan) = node.spec.fabric_vlan(fabric) else {
                debug!("NetworkNode {} has no {} fabric", name, fabric);
                return false;
            };
            if vlan == NOOP_VLAN_ID {
                continue;
            }
            let Some(default) = strategy.default_vlan_id() else {
                if vlan != 0 {
                    return false;
                }
                continue;
            };
            if vlan != default {
                return false;
            }
            let observed = status.observed_fabric_vlans(fabric, &node.spec);
            if observed.len() < node.spec.fabric_port_count(fabric) || observed.iter().any(|(_, v)| *v != default) {
                return false;
            }
        }
        true
    }
}

/// Every fabric with a default VLAN needs leaf switches to carry it
fn ensure_fits(group: &NodeGroup, pool: &Pool) -> Result<(), ControllerError> {
    for fabric in Fabric::ALL {
        let needs_switches = pool
            .fabric_strategy(fabric)
            .and_then(FabricStrategy::default_vlan_id)
            .is_some();
        if needs_switches && group.spec.leaf_switches(fabric).is_empty() {
            return Err(ControllerError::Validation(format!(
                "NodeGroup {} does not fit pool {}: no {} leaf switches",
                group.name_any(),
                pool.name,
                fabric
            )));
        }
    }
    Ok(())
}

fn node_group_converged(group: &NodeGroup, pool: &Pool) -> bool {
    let status = group.status.clone().unwrap_or_default();
    for fabric in Fabric::ALL {
        let Some(strategy) = pool.fabric_strategy(fabric) else {
            continue;
        };
        let Some(config) = group.spec.fabric_config(fabric) else {
            return false;
        };
        let fabric_status = status.fabric_status(fabric);

        if let Some(default) = strategy.default_vlan_id() {
            let Some(vlan_conf) = &config.vlan_conf else {
                return false;
            };
            if vlan_conf.vlan_id != NOOP_VLAN_ID {
                let converged = vlan_conf.vlan_id == default
                    && fabric_status.is_some_and(|s| {
                        s.vlan_config_status.ready && s.vlan_config_status.last_observed_ready_vlan == default
                    });
                if !converged {
                    return false;
                }
            }
        }

        if let Some(default) = strategy.default_bgp_community() {
            let Some(bgp_conf) = &config.bgp_conf else {
                return false;
            };
            if bgp_conf.bgp_community != NOOP_BGP_COMMUNITY {
                let converged = bgp_conf.bgp_community == default
                    && fabric_status.is_some_and(|s| {
                        s.bgp_config_status.ready && s.bgp_config_status.last_observed_ready_bgp == default
                    });
                if !converged {
                    return false;
                }
            }
        }
    }
    true
}
