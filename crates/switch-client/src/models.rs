//! Switch client request/response models

use crate::error::SwitchClientError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Live state of one interface or port-channel as reported by the switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    pub name: String,
    /// "access", "trunk" or "routed"
    pub mode: String,
    pub vlan_id: i64,
    pub description: String,
    pub native_vlan: i64,
    /// Sorted
    pub trunk_groups: Vec<String>,
    /// Port-channel number this interface is a member of, 0 when none
    pub port_channel: i64,
    pub link_status: String,
    pub line_protocol_status: String,
    pub bandwidth: i64,
    pub duplex: String,
    pub interface_type: String,
    /// Unix seconds
    pub last_status_change_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSwitchPortsRequest {
    pub switch_fqdn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateModeRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateVlanRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub vlan: i64,
    /// Toggle LLDP transmit along with the VLAN (physical ports only)
    pub update_lldp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNativeVlanRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub native_vlan: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTrunkGroupsRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub trunk_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptionRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBgpCommunityRequest {
    pub switch_fqdn: String,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBgpCommunityRequest {
    pub switch_fqdn: String,
    pub group_name: String,
    pub bgp_community: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePortChannelRequest {
    pub switch_fqdn: String,
    pub port_channel: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePortChannelRequest {
    pub switch_fqdn: String,
    pub port_channel: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignSwitchPortToPortChannelRequest {
    pub switch_fqdn: String,
    pub port_name: String,
    pub port_channel: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSwitchPortFromPortChannelRequest {
    pub switch_fqdn: String,
    pub port_name: String,
}

/// Switch login shared by every switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    credentials: SwitchCredentials,
}

impl SwitchCredentials {
    /// Parses the YAML credential document (`credentials: {username, password}`)
    pub fn from_yaml(content: &str) -> Result<Self, SwitchClientError> {
        let file: CredentialsFile = serde_yaml::from_str(content)
            .map_err(|e| SwitchClientError::Authentication(format!("invalid credential file: {}", e)))?;
        if file.credentials.username.is_empty() {
            return Err(SwitchClientError::Authentication("username is empty".to_string()));
        }
        Ok(file.credentials)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SwitchClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwitchClientError::Authentication(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_credentials_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "credentials:\n  username: admin\n  password: secret").unwrap();

        let creds = SwitchCredentials::from_file(file.path()).unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn test_credentials_reject_empty_username() {
        let result = SwitchCredentials::from_yaml("credentials:\n  username: \"\"\n  password: x\n");
        assert!(matches!(result, Err(SwitchClientError::Authentication(_))));
    }

    #[test]
    fn test_credentials_missing_file() {
        let result = SwitchCredentials::from_file("/nonexistent/sdn/secrets.yaml");
        assert!(result.is_err(), "Missing file should fail");
    }
}
