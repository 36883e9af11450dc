//! Node usage
//!
//! Whether a compute node is in use is owned by the bare-metal enrollment
//! side, not by this controller. It is read from a JSON file that side
//! keeps current, `{"reservedNodes": ["node-a", ...]}`. Without a file
//! nothing is reserved.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

#[cfg(test)]
use std::sync::{Mutex, PoisonError};

/// Tells whether a compute node is in use and must not be moved
#[async_trait::async_trait]
pub trait NodeUsageReporter: Send + Sync {
    async fn is_node_reserved(&self, node_name: &str) -> bool;
}

/// Used when no usage source is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReservations;

#[async_trait::async_trait]
impl NodeUsageReporter for NoReservations {
    async fn is_node_reserved(&self, _node_name: &str) -> bool {
        false
    }
}

/// Reservations set directly by tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryUsageReporter {
    reserved: Mutex<HashSet<String>>,
}

#[cfg(test)]
impl InMemoryUsageReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, node_name: &str) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_name.to_string());
    }

    pub fn release(&self, node_name: &str) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_name);
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl NodeUsageReporter for InMemoryUsageReporter {
    async fn is_node_reserved(&self, node_name: &str) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node_name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageFile {
    #[serde(default)]
    reserved_nodes: HashSet<String>,
}

/// Reservations read from a JSON file on every call. A file that cannot be
/// read reserves every node, so no migration runs on stale information.
#[derive(Debug, Clone)]
pub struct FileNodeUsageReporter {
    path: PathBuf,
}

impl FileNodeUsageReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl NodeUsageReporter for FileNodeUsageReporter {
    async fn is_node_reserved(&self, node_name: &str) -> bool {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read node usage {}: {}", self.path.display(), e);
                return true;
            }
        };
        match serde_json::from_str::<UsageFile>(&content) {
            Ok(usage) => usage.reserved_nodes.contains(node_name),
            Err(e) => {
                warn!("Cannot parse node usage {}: {}", self.path.display(), e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_no_reservations() {
        assert!(!NoReservations.is_node_reserved("nodeA").await);
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let usage = InMemoryUsageReporter::new();
        assert!(!usage.is_node_reserved("nodeA").await);
        usage.reserve("nodeA");
        assert!(usage.is_node_reserved("nodeA").await);
        usage.release("nodeA");
        assert!(!usage.is_node_reserved("nodeA").await);
    }

    #[tokio::test]
    async fn test_file_reservations_are_reread() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reservedNodes": ["nodeA"]}}"#).unwrap();
        let usage = FileNodeUsageReporter::new(file.path());

        assert!(usage.is_node_reserved("nodeA").await);
        assert!(!usage.is_node_reserved("nodeB").await);

        std::fs::write(file.path(), r#"{"reservedNodes": []}"#).unwrap();
        assert!(!usage.is_node_reserved("nodeA").await);
    }

    #[tokio::test]
    async fn test_unreadable_file_reserves_everything() {
        let usage = FileNodeUsageReporter::new("/nonexistent/usage.json");
        assert!(usage.is_node_reserved("nodeA").await);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(FileNodeUsageReporter::new(file.path()).is_node_reserved("nodeA").await);
    }
}
