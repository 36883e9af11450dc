//! Main controller implementation.
//!
//! Builds the shared components (stores, Device Access Manager, Status
//! Reporter, Pool Manager) and spawns one watcher task per kind. The
//! controller exits as soon as any long-running task stops.

use crate::config::{ControllerConfig, PoolMappingSource};
use crate::devices_manager::{factory_for, DevicesAccessManager};
use crate::error::ControllerError;
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::health::{self, HealthState};
use crate::pool_manager::{
    CrdPoolMappingReader, FileNodeUsageReporter, FilePoolConfigReader, FilePoolMappingReader, NoReservations,
    NodeUsageReporter, PoolConfigReader, PoolManager, PoolMappingReader,
};
use crate::reconciler::Reconciler;
use crate::status_reporter::{StatusReporter, StatusReporterConfig};
use crate::store::Stores;
use crate::watcher::{watch_pool_mappings, PoolMappingContext, Watcher};
use crds::{NetworkNode, NodeGroup, NodeGroupToPoolMapping, PortChannel, Switch, SwitchPort};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONTROLLER_NAME: &str = "sdn-controller";

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for SDN resource management.
pub struct Controller {
    switch_watcher: Task,
    switch_port_watcher: Task,
    port_channel_watcher: Task,
    network_node_watcher: Task,
    node_group_watcher: Task,
    /// Pool Manager plus the mapping watcher feeding it, when enabled
    pool_tasks: Vec<(&'static str, Task)>,
    health_server: Task,
    credentials_watcher: JoinHandle<()>,
    status_reporter: Arc<StatusReporter>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing SDN Controller");
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        let kube_client = Client::try_default()
            .await
            .map_err(|e| ControllerError::Kube(e.into()))?;
        let namespace = config.namespace.as_str();

        let stores = Stores::kube(&kube_client, namespace);
        let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(kube_client.clone(), CONTROLLER_NAME));

        let devices = Arc::new(DevicesAccessManager::new(
            factory_for(&config)?,
            config.switch_secrets_path.clone(),
            &config.data_center,
        )?);
        let credentials_watcher = {
            let devices = devices.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { devices.watch_credentials(cancel).await })
        };

        let status_reporter = Arc::new(StatusReporter::new(
            StatusReporterConfig {
                period: config.status_report_period,
                accelerated_period: config.status_report_accelerated_period,
                bgp_community_group: config.bgp_community_group.clone(),
                port_channels_enabled: config.port_channels_enabled,
            },
            stores.clone(),
            devices.clone(),
            events.clone(),
        ));

        let pools: Arc<dyn PoolConfigReader> = Arc::new(FilePoolConfigReader::new(config.pool_config_path.clone()));

        let reconciler = Arc::new(Reconciler::new(
            config.clone(),
            stores.clone(),
            devices,
            status_reporter.clone(),
            pools.clone(),
            events.clone(),
        ));

        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            Api::<Switch>::namespaced(kube_client.clone(), namespace),
            Api::<SwitchPort>::namespaced(kube_client.clone(), namespace),
            Api::<PortChannel>::namespaced(kube_client.clone(), namespace),
            Api::<NetworkNode>::namespaced(kube_client.clone(), namespace),
            Api::<NodeGroup>::namespaced(kube_client.clone(), namespace),
            config.max_concurrent_reconciles,
            cancel.clone(),
        ));

        let switch_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switches().await })
        };
        let switch_port_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switch_ports().await })
        };
        let port_channel_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_port_channels().await })
        };
        let network_node_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_network_nodes().await })
        };
        let node_group_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_node_groups().await })
        };

        let mut pool_tasks = Vec::new();
        if config.pool_manager_enabled {
            let mappings: Arc<dyn PoolMappingReader> = match config.pool_mapping_source {
                PoolMappingSource::File => Arc::new(FilePoolMappingReader::new(config.pool_mapping_file_path.clone())),
                PoolMappingSource::Crd => {
                    let reader = Arc::new(CrdPoolMappingReader::new(stores.mappings.clone()));
                    let api: Api<NodeGroupToPoolMapping> = Api::namespaced(kube_client.clone(), namespace);
                    let ctx = Arc::new(PoolMappingContext {
                        reader: reader.clone(),
                        mappings: stores.mappings.clone(),
                        node_groups: stores.node_groups.clone(),
                    });
                    let feed = {
                        let cancel = cancel.clone();
                        tokio::spawn(async move { watch_pool_mappings(api, ctx, cancel).await })
                    };
                    pool_tasks.push(("Pool mapping watcher", feed));
                    reader
                }
            };
            let usage: Arc<dyn NodeUsageReporter> = match &config.node_usage_file_path {
                Some(path) => Arc::new(FileNodeUsageReporter::new(path.clone())),
                None => {
                    warn!("NODE_USAGE_FILE_PATH not set, no NetworkNode counts as reserved");
                    Arc::new(NoReservations)
                }
            };
            let pool_manager = PoolManager::new(
                stores,
                pools,
                mappings,
                usage,
                events,
                config.use_default_value_in_pool_for_moving_node_group,
            );
            let cancel = cancel.clone();
            pool_tasks.push(("Pool manager", tokio::spawn(async move { pool_manager.run(cancel).await })));
        } else {
            info!("Pool manager disabled");
        }

        let health_state = HealthState::default();
        let health_server = {
            let state = health_state.clone();
            let address = config.health_bind_address.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { health::serve(&address, state, cancel).await })
        };
        health_state.set_ready(true);

        Ok(Self {
            switch_watcher,
            switch_port_watcher,
            port_channel_watcher,
            network_node_watcher,
            node_group_watcher,
            pool_tasks,
            health_server,
            credentials_watcher,
            status_reporter,
            cancel,
        })
    }

    /// Runs until a task stops. Every other task is then cancelled.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("SDN Controller running");

        let pool_tasks = std::mem::take(&mut self.pool_tasks);
        let pool_watch = async move {
            if pool_tasks.is_empty() {
                return std::future::pending().await;
            }
            let (names, handles): (Vec<_>, Vec<_>) = pool_tasks.into_iter().unzip();
            let (result, index, _) = futures::future::select_all(handles).await;
            (names[index], result)
        };

        let result = tokio::select! {
            result = &mut self.switch_watcher => finished("Switch watcher", result),
            result = &mut self.switch_port_watcher => finished("SwitchPort watcher", result),
            result = &mut self.port_channel_watcher => finished("PortChannel watcher", result),
            result = &mut self.network_node_watcher => finished("NetworkNode watcher", result),
            result = &mut self.node_group_watcher => finished("NodeGroup watcher", result),
            result = &mut self.health_server => finished("Health server", result),
            (name, result) = pool_watch => finished(name, result),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        self.cancel.cancel();
        self.status_reporter.shutdown();
        if let Err(e) = (&mut self.credentials_watcher).await {
            warn!("Credential watcher panicked: {}", e);
        }
        result
    }
}

/// Flattens a stopped task's outcome. A task returning `Ok` before
/// shutdown is still treated as the end of the controller.
fn finished(
    name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} panicked: {}", name, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} error: {}", name, e)))?;
    warn!("{} stopped", name);
    Ok(())
}
