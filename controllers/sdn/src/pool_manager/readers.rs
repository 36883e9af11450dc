//! Pool catalog and NodeGroup to Pool mapping sources
//!
//! Pools come from a JSON catalog file. Mappings come either from a
//! polled JSON file or from NodeGroupToPoolMapping records; the record
//! source also turns watch events into [`MappingEvent`]s that the Pool
//! Manager answers one at a time.

use crate::error::ControllerError;
use crate::store::ResourceApi;
use crds::{NodeGroupToPoolMapping, Pool, PoolList};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Longest wait to hand an event to the Pool Manager
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest wait for the Pool Manager to answer an event
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);

const EVENT_QUEUE_CAPACITY: usize = 16;

/// Outcome of one migration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Success,
    InProgress,
    Failed,
    NoOp,
}

/// Answer sent back for a [`MappingEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingResult {
    pub status: MigrationStatus,
    pub error: Option<String>,
}

impl MappingResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: MigrationStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// A NodeGroup should move to `pool`
#[derive(Debug)]
pub struct MappingEvent {
    pub node_group: String,
    pub pool: String,
    pub response: oneshot::Sender<MappingResult>,
}

#[async_trait::async_trait]
pub trait PoolConfigReader: Send + Sync {
    async fn get_pool_by_name(&self, name: &str) -> Result<Pool, ControllerError>;
}

#[async_trait::async_trait]
pub trait PoolMappingReader: Send + Sync {
    /// NodeGroup name -> pool name
    async fn get_group_to_pool_mappings(&self) -> Result<HashMap<String, String>, ControllerError>;

    /// Event stream, or `None` when the source can only be polled.
    /// Only the first caller receives the stream.
    fn watch_group_to_pool_mappings(&self) -> Option<mpsc::Receiver<MappingEvent>>;
}

/// Pool catalog read from a JSON file on every call, so edits apply without a restart
#[derive(Debug, Clone)]
pub struct FilePoolConfigReader {
    path: PathBuf,
}

impl FilePoolConfigReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<PoolList, ControllerError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to read pool catalog {}: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait::async_trait]
impl PoolConfigReader for FilePoolConfigReader {
    async fn get_pool_by_name(&self, name: &str) -> Result<Pool, ControllerError> {
        self.load()
            .await?
            .items
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ControllerError::NotFound(format!("Pool {}", name)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingFileEntry {
    node_group: String,
    #[serde(default)]
    pool: String,
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    items: Vec<MappingFileEntry>,
}

/// Mappings read from `{"items": [{"nodeGroup": .., "pool": ..}]}`; poll only
#[derive(Debug, Clone)]
pub struct FilePoolMappingReader {
    path: PathBuf,
}

impl FilePoolMappingReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl PoolMappingReader for FilePoolMappingReader {
    async fn get_group_to_pool_mappings(&self) -> Result<HashMap<String, String>, ControllerError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to read pool mappings {}: {}", self.path.display(), e))
        })?;
        let file: MappingFile = serde_json::from_str(&content)?;
        Ok(file.items.into_iter().map(|m| (m.node_group, m.pool)).collect())
    }

    fn watch_group_to_pool_mappings(&self) -> Option<mpsc::Receiver<MappingEvent>> {
        None
    }
}

/// Mappings backed by NodeGroupToPoolMapping records
pub struct CrdPoolMappingReader {
    mappings: Arc<dyn ResourceApi<NodeGroupToPoolMapping>>,
    tx: mpsc::Sender<MappingEvent>,
    rx: Mutex<Option<mpsc::Receiver<MappingEvent>>>,
}

impl CrdPoolMappingReader {
    pub fn new(mappings: Arc<dyn ResourceApi<NodeGroupToPoolMapping>>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            mappings,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Hands a mapping change to the Pool Manager and waits for its answer.
    /// A full queue or a missing answer counts as a failure.
    pub async fn dispatch(&self, node_group: &str, pool: &str) -> MappingResult {
        self.dispatch_with_timeouts(node_group, pool, ENQUEUE_TIMEOUT, RESPONSE_TIMEOUT)
            .await
    }

    pub(crate) async fn dispatch_with_timeouts(
        &self,
        node_group: &str,
        pool: &str,
        enqueue_timeout: Duration,
        response_timeout: Duration,
    ) -> MappingResult {
        let (response, answer) = oneshot::channel();
        let event = MappingEvent {
            node_group: node_group.to_string(),
            pool: pool.to_string(),
            response,
        };

        if let Err(e) = self.tx.send_timeout(event, enqueue_timeout).await {
            warn!("Could not queue pool mapping for NodeGroup {}: {}", node_group, e);
            return MappingResult::failed(format!("pool manager did not accept the event: {}", e));
        }
        debug!("Queued pool mapping {} -> {}", node_group, pool);

        match tokio::time::timeout(response_timeout, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => MappingResult::failed("pool manager dropped the event"),
            Err(_) => {
                warn!("Timed out waiting for pool migration of NodeGroup {}", node_group);
                MappingResult::failed(format!(
                    "no answer within {}s",
                    response_timeout.as_secs()
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl PoolMappingReader for CrdPoolMappingReader {
    async fn get_group_to_pool_mappings(&self) -> Result<HashMap<String, String>, ControllerError> {
        Ok(self
            .mappings
            .list(None)
            .await?
            .into_iter()
            .map(|m| (m.spec.node_group, m.spec.pool))
            .collect())
    }

    fn watch_group_to_pool_mappings(&self) -> Option<mpsc::Receiver<MappingEvent>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteLog};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_pool_reader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"items": [{{"name": "poolA", "schedulingConfig": {{"minimumSchedulableUnit": "NetworkNode"}}}}]}}"#
        )
        .unwrap();

        let reader = FilePoolConfigReader::new(file.path());
        assert_eq!(reader.get_pool_by_name("poolA").await.unwrap().name, "poolA");
        assert!(reader.get_pool_by_name("poolB").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_mapping_reader_has_no_watch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"items": [{{"nodeGroup": "ng1", "pool": "poolA"}}, {{"nodeGroup": "ng2"}}]}}"#).unwrap();

        let reader = FilePoolMappingReader::new(file.path());
        let mappings = reader.get_group_to_pool_mappings().await.unwrap();
        assert_eq!(mappings.get("ng1").map(String::as_str), Some("poolA"));
        assert_eq!(mappings.get("ng2").map(String::as_str), Some(""));
        assert!(reader.watch_group_to_pool_mappings().is_none());
    }

    #[tokio::test]
    async fn test_crd_reader_lists_records() {
        let store: MemoryStore<NodeGroupToPoolMapping> = MemoryStore::new("NodeGroupToPoolMapping", WriteLog::default());
        store.insert(NodeGroupToPoolMapping {
            metadata: ObjectMeta {
                name: Some("ng1".to_string()),
                ..Default::default()
            },
            spec: crds::NodeGroupToPoolMappingSpec {
                node_group: "ng1".to_string(),
                pool: "poolA".to_string(),
            },
        });

        let reader = CrdPoolMappingReader::new(Arc::new(store));
        let mappings = reader.get_group_to_pool_mappings().await.unwrap();
        assert_eq!(mappings.get("ng1").map(String::as_str), Some("poolA"));
        assert!(reader.watch_group_to_pool_mappings().is_some());
        assert!(reader.watch_group_to_pool_mappings().is_none(), "Stream is handed out once");
    }

    #[tokio::test]
    async fn test_dispatch_returns_answer() {
        let store: MemoryStore<NodeGroupToPoolMapping> = MemoryStore::new("NodeGroupToPoolMapping", WriteLog::default());
        let reader = CrdPoolMappingReader::new(Arc::new(store));
        let mut rx = reader.watch_group_to_pool_mappings().unwrap();

        tokio::spawn(async move {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.node_group, "ng1");
            let _ = event.response.send(MappingResult {
                status: MigrationStatus::InProgress,
                error: None,
            });
        });

        let result = reader.dispatch("ng1", "poolA").await;
        assert_eq!(result.status, MigrationStatus::InProgress);
    }

    #[tokio::test]
    async fn test_dispatch_times_out_without_answer() {
        let store: MemoryStore<NodeGroupToPoolMapping> = MemoryStore::new("NodeGroupToPoolMapping", WriteLog::default());
        let reader = CrdPoolMappingReader::new(Arc::new(store));
        // Keep the receiver alive but never answer
        let _rx = reader.watch_group_to_pool_mappings().unwrap();

        let result = reader
            .dispatch_with_timeouts("ng1", "poolA", Duration::from_millis(50), Duration::from_millis(50))
            .await;
        assert_eq!(result.status, MigrationStatus::Failed);
        assert!(result.error.unwrap().contains("no answer"));
    }
}
