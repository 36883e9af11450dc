//! Controller-specific error types.
//!
//! Variants follow the failure classes the reconcilers distinguish:
//! absent records, ownership conflicts, device failures, policy
//! violations and optimistic-concurrency conflicts.

use crds::NamingError;
use kube::Error as KubeError;
use switch_client::SwitchClientError;
use thiserror::Error;

/// Errors that can occur in the SDN Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// A switch command failed
    #[error("Switch error: {0}")]
    SwitchClient(#[from] SwitchClientError),

    /// No usable client for a switch (not registered, or could not be built)
    #[error("Switch transport error: {0}")]
    SwitchTransport(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another NetworkNode already owns the record
    #[error("Ownership conflict: {0}")]
    OwnershipConflict(String),

    /// Desired value outside policy, or a migration precondition failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Record changed since it was read
    #[error("Store conflict: {0}")]
    StoreConflict(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Several independent failures from one pass
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl From<NamingError> for ControllerError {
    fn from(e: NamingError) -> Self {
        ControllerError::Validation(e.to_string())
    }
}

impl ControllerError {
    /// Collapses per-field failures: none is Ok, one is returned as is
    pub fn from_errors(mut errors: Vec<ControllerError>) -> Result<(), ControllerError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ControllerError::Aggregate(errors)),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound(_))
    }

    /// Conflicts are retried by requeue and not reported as failures
    #[must_use]
    pub fn is_store_conflict(&self) -> bool {
        match self {
            ControllerError::StoreConflict(_) => true,
            ControllerError::Aggregate(errors) => errors.iter().all(ControllerError::is_store_conflict),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errors() {
        assert!(ControllerError::from_errors(vec![]).is_ok());

        let single = ControllerError::from_errors(vec![ControllerError::NotFound("a".to_string())]).unwrap_err();
        assert!(single.is_not_found());

        let many = ControllerError::from_errors(vec![
            ControllerError::Validation("vlan".to_string()),
            ControllerError::Validation("mode".to_string()),
        ])
        .unwrap_err();
        assert_eq!(
            many.to_string(),
            "2 errors: Validation failed: vlan; Validation failed: mode"
        );
    }

    #[test]
    fn test_store_conflict_detection() {
        assert!(ControllerError::StoreConflict("x".to_string()).is_store_conflict());
        let mixed = ControllerError::Aggregate(vec![
            ControllerError::StoreConflict("x".to_string()),
            ControllerError::NotFound("y".to_string()),
        ]);
        assert!(!mixed.is_store_conflict(), "Mixed failures are real errors");
    }
}
