//! Kubernetes resource watchers.
//!
//! Every kind runs in its own `kube_runtime::Controller` through the
//! generic `watch_resource()` helper. Failed passes are requeued with the
//! reconciler's per-resource Fibonacci backoff; store conflicts are
//! retried after a short fixed delay.
//!
//! NodeGroupToPoolMapping records are not reconciled here: they are handed
//! to the Pool Manager, which answers each one in turn. A finalizer holds
//! deleted records until their NodeGroup has been unmapped.

use crate::error::ControllerError;
use crate::pool_manager::{CrdPoolMappingReader, MappingResult, MigrationStatus, DEFAULT_POLL_INTERVAL};
use crate::reconciler::network_node::network_node_for_switch_port;
use crate::reconciler::node_group::node_group_for_member;
use crate::reconciler::Reconciler;
use crate::store::{with_resource_version, ResourceApi};
use crds::{NetworkNode, NodeGroup, NodeGroupToPoolMapping, PortChannel, Switch, SwitchPort, POOL_MAPPING_FINALIZER};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as RuntimeConfig},
    watcher, Controller,
};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before retrying a pass that lost an optimistic-concurrency race
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);
/// Delay before retrying a failed pool migration
const MIGRATION_RETRY: Duration = Duration::from_secs(30);
/// Delay before looking again for the NodeGroup of a mapping
const MISSING_GROUP_RETRY: Duration = DEFAULT_POLL_INTERVAL;

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff bookkeeping key, `Kind/name`
fn resource_key<K: ResourceExt>(kind: &str, obj: &K) -> String {
    format!("{}/{}", kind, obj.name_any())
}

/// Requeue decision for a failed pass
fn error_action(reconciler: &Reconciler, key: &str, error: &ControllerError) -> Action {
    if error.is_store_conflict() {
        debug!("{} changed while reconciling, retrying", key);
        return Action::requeue(CONFLICT_REQUEUE);
    }
    reconciler.increment_error(key);
    let (backoff, error_count) = reconciler.get_backoff_for_resource(key);
    error!(
        "Reconciliation error for {} (attempt {}), retrying in {}s: {}",
        key,
        error_count,
        backoff.as_secs(),
        error
    );
    Action::requeue(backoff)
}

/// Runs `controller` until its stream ends or `cancel` fires
async fn drive<S>(controller: S, kind: &'static str, cancel: CancellationToken) -> Result<(), ControllerError>
where
    S: futures::Stream<Item = ()> + Send,
{
    let stream = controller.for_each(|()| async {});
    tokio::select! {
        () = stream => Err(ControllerError::Watch(format!("{} watch stream ended", kind))),
        () = cancel.cancelled() => {
            info!("{} watcher stopped", kind);
            Ok(())
        }
    }
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// `configure` adds secondary watches that requeue the primary record.
async fn watch_resource<K, F, C>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    configure: C,
    kind: &'static str,
    concurrency: u16,
    cancel: CancellationToken,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
    C: FnOnce(Controller<K>) -> Controller<K>,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        error_action(&ctx, &resource_key(kind, obj.as_ref()), error)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(kind, obj.as_ref());
            debug!("Reconciling {}", key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_error(&key);
            Ok::<Action, ControllerError>(action)
        }
    };

    let controller_config = RuntimeConfig::default()
        .debounce(Duration::from_millis(500))
        .concurrency(concurrency);

    let controller = configure(Controller::new(api, watcher::Config::default()))
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .map(move |res| {
            if let Err(e) = res {
                debug!("{} controller event: {}", kind, e);
            }
        });

    drive(controller, kind, cancel).await
}

/// Requeue decision for a Pool Manager answer. A group still waiting for
/// readiness is checked again after the poll interval.
pub fn mapping_action(node_group: &str, result: &MappingResult) -> Result<Action, ControllerError> {
    match result.status {
        MigrationStatus::Success | MigrationStatus::NoOp => Ok(Action::await_change()),
        MigrationStatus::InProgress => Ok(Action::requeue(DEFAULT_POLL_INTERVAL)),
        MigrationStatus::Failed => Err(ControllerError::Reconciliation(format!(
            "pool migration of NodeGroup {} failed: {}",
            node_group,
            result.error.as_deref().unwrap_or("unknown error")
        ))),
    }
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    switch_api: Api<Switch>,
    switch_port_api: Api<SwitchPort>,
    port_channel_api: Api<PortChannel>,
    network_node_api: Api<NetworkNode>,
    node_group_api: Api<NodeGroup>,
    concurrency: u16,
    cancel: CancellationToken,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        switch_api: Api<Switch>,
        switch_port_api: Api<SwitchPort>,
        port_channel_api: Api<PortChannel>,
        network_node_api: Api<NetworkNode>,
        node_group_api: Api<NodeGroup>,
        concurrency: u16,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            switch_api,
            switch_port_api,
            port_channel_api,
            network_node_api,
            node_group_api,
            concurrency,
            cancel,
        }
    }

    pub async fn watch_switches(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.switch_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_switch(&resource).await }),
            |controller| controller,
            "Switch",
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }

    pub async fn watch_switch_ports(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.switch_port_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_switch_port(&resource).await }),
            |controller| controller,
            "SwitchPort",
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }

    pub async fn watch_port_channels(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.port_channel_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_port_channel(&resource).await }),
            |controller| controller,
            "PortChannel",
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }

    /// NetworkNodes are also requeued when one of their SwitchPorts reports
    /// new state, so readiness follows the Status Reporter.
    pub async fn watch_network_nodes(&self) -> Result<(), ControllerError> {
        let switch_port_api = self.switch_port_api.clone();
        watch_resource(
            self.network_node_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_network_node(&resource).await }),
            move |controller| {
                controller.watches(switch_port_api, watcher::Config::default(), |sp| {
                    network_node_for_switch_port(&sp)
                })
            },
            "NetworkNode",
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }

    /// NodeGroups are requeued when a labelled member NetworkNode or leaf
    /// Switch changes.
    pub async fn watch_node_groups(&self) -> Result<(), ControllerError> {
        let network_node_api = self.network_node_api.clone();
        let switch_api = self.switch_api.clone();
        watch_resource(
            self.node_group_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_node_group(&resource).await }),
            move |controller| {
                controller
                    .watches(network_node_api, watcher::Config::default(), |node| {
                        node_group_for_member(&node)
                    })
                    .watches(switch_api, watcher::Config::default(), |switch| {
                        node_group_for_member(&switch)
                    })
            },
            "NodeGroup",
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }
}

/// What the mapping watcher needs besides the Pool Manager queue
pub struct PoolMappingContext {
    pub reader: Arc<CrdPoolMappingReader>,
    pub mappings: Arc<dyn ResourceApi<NodeGroupToPoolMapping>>,
    pub node_groups: Arc<dyn ResourceApi<NodeGroup>>,
}

fn has_mapping_finalizer(mapping: &NodeGroupToPoolMapping) -> bool {
    mapping.finalizers().iter().any(|f| f == POOL_MAPPING_FINALIZER)
}

/// Hands one mapping record to the Pool Manager.
///
/// A deleted record unmaps its NodeGroup (empty target pool) before its
/// finalizer is dropped. A record whose NodeGroup does not exist yet is
/// looked at again after [`MISSING_GROUP_RETRY`].
pub async fn reconcile_pool_mapping(
    ctx: &PoolMappingContext,
    mapping: &NodeGroupToPoolMapping,
) -> Result<Action, ControllerError> {
    let name = mapping.name_any();
    let Some(mapping) = ctx.mappings.get_opt(&name).await? else {
        return Ok(Action::await_change());
    };
    let node_group = mapping.spec.node_group.clone();
    let node_group = node_group.as_str();
    let group_exists = ctx.node_groups.get_opt(node_group).await?.is_some();

    if mapping.meta().deletion_timestamp.is_some() {
        if !has_mapping_finalizer(&mapping) {
            return Ok(Action::await_change());
        }
        if group_exists {
            info!("Pool mapping {} deleted, unmapping NodeGroup {}", name, node_group);
            let result = ctx.reader.dispatch(node_group, "").await;
            mapping_action(node_group, &result)?;
        }
        let finalizers: Vec<String> = mapping
            .finalizers()
            .iter()
            .filter(|f| *f != POOL_MAPPING_FINALIZER)
            .cloned()
            .collect();
        let patch = with_resource_version(json!({"metadata": {"finalizers": finalizers}}), &mapping);
        ctx.mappings.patch(&name, &patch).await?;
        return Ok(Action::await_change());
    }

    let mapping = if has_mapping_finalizer(&mapping) {
        mapping
    } else {
        let mut finalizers = mapping.finalizers().to_vec();
        finalizers.push(POOL_MAPPING_FINALIZER.to_string());
        let patch = with_resource_version(json!({"metadata": {"finalizers": finalizers}}), &mapping);
        ctx.mappings.patch(&name, &patch).await?
    };

    if !group_exists {
        debug!("NodeGroup {} of pool mapping {} not found yet", node_group, name);
        return Ok(Action::requeue(MISSING_GROUP_RETRY));
    }

    debug!("Pool mapping {} -> {}", node_group, mapping.spec.pool);
    let result = ctx.reader.dispatch(node_group, &mapping.spec.pool).await;
    mapping_action(node_group, &result)
}

/// Feeds NodeGroupToPoolMapping records to the Pool Manager
pub async fn watch_pool_mappings(
    api: Api<NodeGroupToPoolMapping>,
    ctx: Arc<PoolMappingContext>,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    info!("Starting NodeGroupToPoolMapping watcher");

    let error_policy = |obj: Arc<NodeGroupToPoolMapping>, error: &ControllerError, _ctx: Arc<PoolMappingContext>| {
        if error.is_store_conflict() {
            return Action::requeue(CONFLICT_REQUEUE);
        }
        warn!("Pool mapping {}: {}", obj.name_any(), error);
        Action::requeue(MIGRATION_RETRY)
    };

    let reconcile = |obj: Arc<NodeGroupToPoolMapping>, ctx: Arc<PoolMappingContext>| async move {
        reconcile_pool_mapping(&ctx, &obj).await
    };

    // Migrations are serialized by the Pool Manager, one at a time is enough
    let controller = Controller::new(api, watcher::Config::default())
        .with_config(RuntimeConfig::default().concurrency(1))
        .run(reconcile, error_policy, ctx)
        .map(|res| {
            if let Err(e) = res {
                debug!("NodeGroupToPoolMapping controller event: {}", e);
            }
        });

    drive(controller, "NodeGroupToPoolMapping", cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_manager::PoolManager;
    use crate::test_utils::*;
    use crds::{NodeGroupToPoolMappingSpec, SchedulableUnit, LABEL_POOL};

    #[test]
    fn test_mapping_action() {
        let done = MappingResult {
            status: MigrationStatus::Success,
            error: None,
        };
        assert_eq!(mapping_action("ng1", &done).unwrap(), Action::await_change());

        let waiting = MappingResult {
            status: MigrationStatus::InProgress,
            error: None,
        };
        assert_eq!(mapping_action("ng1", &waiting).unwrap(), Action::requeue(DEFAULT_POLL_INTERVAL));

        let failed = MappingResult::failed("node n1 is reserved");
        let err = mapping_action("ng1", &failed).unwrap_err();
        assert!(err.to_string().contains("node n1 is reserved"));
    }

    #[tokio::test]
    async fn test_error_action_backs_off_and_skips_conflicts() {
        let env = TestEnv::new();
        let key = "SwitchPort/ethernet1.sw1.example.com";

        let conflict = ControllerError::StoreConflict("resourceVersion".to_string());
        assert_eq!(error_action(&env.reconciler, key, &conflict), Action::requeue(CONFLICT_REQUEUE));
        assert_eq!(env.reconciler.get_backoff_for_resource(key).1, 0, "Conflicts do not count as errors");

        let failure = ControllerError::SwitchTransport("timeout".to_string());
        error_action(&env.reconciler, key, &failure);
        error_action(&env.reconciler, key, &failure);
        assert_eq!(env.reconciler.get_backoff_for_resource(key).1, 2);

        env.reconciler.reset_error(key);
        assert_eq!(env.reconciler.get_backoff_for_resource(key).1, 0);
    }

    fn mapping(node_group: &str, pool: &str) -> NodeGroupToPoolMapping {
        let mut mapping = NodeGroupToPoolMapping::new(
            node_group,
            NodeGroupToPoolMappingSpec {
                node_group: node_group.to_string(),
                pool: pool.to_string(),
            },
        );
        mapping.metadata.namespace = Some("idcs-system".to_string());
        mapping
    }

    /// Pool Manager answering the mapping queue until `cancel` fires
    fn mapping_context(env: &TestEnv, cancel: &CancellationToken) -> PoolMappingContext {
        let reader = Arc::new(CrdPoolMappingReader::new(env.mappings.clone()));
        let pool_manager = PoolManager::new(
            env.stores.clone(),
            env.pools.clone(),
            reader.clone(),
            env.usage.clone(),
            env.events.clone(),
            true,
        );
        let cancel = cancel.clone();
        tokio::spawn(async move { pool_manager.run(cancel).await });
        PoolMappingContext {
            reader,
            mappings: env.stores.mappings.clone(),
            node_groups: env.stores.node_groups.clone(),
        }
    }

    #[tokio::test]
    async fn test_mapping_gets_finalizer_and_is_dispatched() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();
        let ctx = mapping_context(&env, &cancel);
        env.pools.add(create_test_pool("poolA", Some(100), SchedulableUnit::NodeGroup));
        env.add_switch("leaf1.example.com", None);
        env.node_groups
            .insert(create_test_node_group("ng1", &[], &["leaf1.example.com"]));
        env.mappings.insert(mapping("ng1", "poolA"));

        let action = reconcile_pool_mapping(&ctx, &mapping("ng1", "poolA")).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_POLL_INTERVAL), "Migration waits for readiness");
        let stored = env.mappings.object("ng1").unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![POOL_MAPPING_FINALIZER.to_string()]));
        let group = env.node_groups.object("ng1").unwrap();
        assert_eq!(group.labels().get(LABEL_POOL).map(String::as_str), Some("poolA"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_mapping_for_missing_group_is_retried() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();
        let ctx = mapping_context(&env, &cancel);
        env.mappings.insert(mapping("ng9", "poolA"));

        let action = reconcile_pool_mapping(&ctx, &mapping("ng9", "poolA")).await.unwrap();

        assert_eq!(action, Action::requeue(MISSING_GROUP_RETRY));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_deleted_mapping_unmaps_group() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();
        let ctx = mapping_context(&env, &cancel);
        env.node_groups
            .insert(with_label(create_test_node_group("ng1", &[], &[]), LABEL_POOL, "poolA"));
        let mut record = mapping("ng1", "poolA");
        record.metadata.finalizers = Some(vec![POOL_MAPPING_FINALIZER.to_string()]);
        env.mappings.insert(record.clone());
        env.mappings.delete("ng1").await.unwrap();

        let action = reconcile_pool_mapping(&ctx, &record).await.unwrap();

        assert_eq!(action, Action::await_change());
        let group = env.node_groups.object("ng1").unwrap();
        assert!(group.labels().get(LABEL_POOL).is_none(), "Pool label is cleared");
        assert!(env.mappings.object("ng1").is_none(), "Record goes once the group is unmapped");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_deleted_mapping_of_missing_group_is_released() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();
        let ctx = mapping_context(&env, &cancel);
        let mut record = mapping("ng9", "poolA");
        record.metadata.finalizers = Some(vec![POOL_MAPPING_FINALIZER.to_string()]);
        env.mappings.insert(record.clone());
        env.mappings.delete("ng9").await.unwrap();

        reconcile_pool_mapping(&ctx, &record).await.unwrap();

        assert!(env.mappings.object("ng9").is_none());
        cancel.cancel();
    }
}
