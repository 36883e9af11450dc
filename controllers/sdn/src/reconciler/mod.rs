//! Reconciliation logic for the SDN CRDs.
//!
//! One file per kind:
//! - `switch`: device registration and BGP community
//! - `switch_port`: per-interface configuration
//! - `port_channel`: port-channel lifecycle and configuration
//! - `network_node`: SwitchPort records and ownership for a compute host
//! - `node_group`: group-level VLAN/BGP policy and readiness

pub mod switch;
pub mod switch_port;
pub mod port_channel;
pub mod network_node;
pub mod node_group;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::devices_manager::DevicesAccessManager;
use crate::events::{actions, EventPublisher};
use crate::pool_manager::PoolConfigReader;
use crate::status_reporter::StatusReporter;
use crate::store::Stores;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switch_client::SwitchClientTrait;
use tracing::{debug, warn};

/// Requeue delay while a dependency is not ready yet (switch client missing, parent in maintenance)
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue delay after creating a port-channel on a switch
pub const AFTER_CREATE_REQUEUE: Duration = Duration::from_secs(1);
/// Requeue delay while a NodeGroup is converging
pub const NODE_GROUP_CONVERGING_REQUEUE: Duration = Duration::from_secs(3);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles SDN resources.
pub struct Reconciler {
    pub(crate) config: Arc<ControllerConfig>,
    pub(crate) stores: Stores,
    pub(crate) devices: Arc<DevicesAccessManager>,
    pub(crate) status_reporter: Arc<StatusReporter>,
    pub(crate) pools: Arc<dyn PoolConfigReader>,
    pub(crate) events: Arc<dyn EventPublisher>,
    /// Error count tracking per resource (Kind/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        config: Arc<ControllerConfig>,
        stores: Stores,
        devices: Arc<DevicesAccessManager>,
        status_reporter: Arc<StatusReporter>,
        pools: Arc<dyn PoolConfigReader>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            stores,
            devices,
            status_reporter,
            pools,
            events,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Switch client for `fqdn`, or `None` while the switch is not registered yet
    pub(crate) fn switch_client(&self, fqdn: &str) -> Option<Arc<dyn SwitchClientTrait>> {
        match self.devices.get_switch_client(fqdn) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!("No switch client for {} yet: {}", fqdn, e);
                None
            }
        }
    }

    pub(crate) async fn publish(&self, object_ref: &ObjectReference, warning: bool, reason: &str, note: String) {
        let type_ = if warning { EventType::Warning } else { EventType::Normal };
        self.events
            .publish(object_ref, type_, reason, actions::RECONCILE, Some(note))
            .await;
    }

    /// Get the Fibonacci backoff for a resource based on its error count
    ///
    /// Returns (backoff, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
