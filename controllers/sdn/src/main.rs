//! SDN Controller
//!
//! Drives datacenter switches from declarative records:
//! - Switch: device registration and BGP community
//! - SwitchPort / PortChannel: per-interface VLAN, mode and trunk configuration
//! - NetworkNode: the SwitchPorts a compute host is cabled to
//! - NodeGroup: group-level policy and pool migrations
//!
//! Observed switch state is written back by a per-switch Status Reporter.

mod backoff;
mod config;
mod controller;
mod devices_manager;
mod error;
mod events;
mod health;
mod pool_manager;
mod reconcile_helpers;
mod reconciler;
mod status_reporter;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    // kube and reqwest both link rustls; pick the provider once
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting SDN Controller");

    let config = ControllerConfig::from_env()?;
    config.validate()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Data center: {}", config.data_center);
    info!("  Switch backend: {:?}", config.backend_mode);
    info!("  Switch credentials: {}", config.switch_secrets_path.display());
    info!("  Max concurrent reconciles: {}", config.max_concurrent_reconciles);
    info!("  Status report period: {}s", config.status_report_period.as_secs());
    info!("  Port-channels enabled: {}", config.port_channels_enabled);
    info!("  Pool manager enabled: {}", config.pool_manager_enabled);
    info!("  Pool mapping source: {:?}", config.pool_mapping_source);
    if let Some(path) = &config.node_usage_file_path {
        info!("  Node usage: {}", path.display());
    }
    info!("  Health endpoint: {}", config.health_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
