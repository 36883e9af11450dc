//! Kubernetes Events
//!
//! Warnings and conflicts are published as Events on the affected record
//! so operators see them with `kubectl describe`. Publishing failures are
//! logged and never fail a reconcile.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event reasons
pub mod reasons {
    pub const SWITCH_PORT_UPDATED: &str = "SwitchPortUpdated";
    pub const SWITCH_PORT_UPDATE_FAILED: &str = "SwitchPortUpdateFailed";
    pub const PORT_CHANNEL_UPDATED: &str = "PortChannelUpdated";
    pub const PORT_CHANNEL_UPDATE_FAILED: &str = "PortChannelUpdateFailed";
    pub const SWITCH_PORT_ALREADY_OWNED: &str = "SwitchPort already owned";
    pub const VLAN_UPDATE: &str = "updating vlan";
    pub const BGP_UPDATED: &str = "BGPCommunityUpdated";
    pub const BGP_UPDATE_FAILED: &str = "BGPCommunityUpdateFailed";
    pub const STATUS_REPORT_FAILED: &str = "StatusReportFailed";
    pub const UNEXPECTED_VLAN: &str = "unexpected VLAN value";
    pub const POOL_MIGRATION_STARTED: &str = "PoolMigrationStarted";
    pub const POOL_MIGRATION_COMPLETED: &str = "PoolMigrationCompleted";
    pub const POOL_MIGRATION_FAILED: &str = "PoolMigrationFailed";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const REPORT_STATUS: &str = "ReportStatus";
    pub const MIGRATE: &str = "Migrate";
}

/// Publishes Events about records
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by the Events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object_ref).await {
            warn!(
                "Failed to publish event {} for {}: {}",
                reason,
                object_ref.name.as_deref().unwrap_or_default(),
                e
            );
        }
    }
}

#[cfg(test)]
pub use recording::{RecordedEvent, RecordingPublisher};

#[cfg(test)]
mod recording {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct RecordedEvent {
        pub kind: String,
        pub name: String,
        pub warning: bool,
        pub reason: String,
        pub note: Option<String>,
    }

    /// Keeps published events in memory
    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl RecordingPublisher {
        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn warnings(&self) -> Vec<RecordedEvent> {
            self.events().into_iter().filter(|e| e.warning).collect()
        }

        pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
            self.events().into_iter().filter(|e| e.reason == reason).collect()
        }
    }

    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            object_ref: &ObjectReference,
            type_: EventType,
            reason: &str,
            _action: &str,
            note: Option<String>,
        ) {
            self.events.lock().unwrap().push(RecordedEvent {
                kind: object_ref.kind.clone().unwrap_or_default(),
                name: object_ref.name.clone().unwrap_or_default(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                note,
            });
        }
    }
}
