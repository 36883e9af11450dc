//! Input validation for switch writes
//!
//! Every write is checked against a [`ClientPolicy`] before any command is
//! sent, so a bad desired value never reaches a device.

use crate::error::SwitchClientError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub const MAX_DESCRIPTION_LENGTH: usize = 100;
pub const MAX_TRUNK_GROUP_LENGTH: usize = 32;
pub const MAX_BGP_GROUP_NAME_LENGTH: usize = 32;
pub const MAX_BGP_COMMUNITY: i64 = 65_535;

static VLAN_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]+)-([0-9]+)$").expect("Invalid VLAN range regex"));
static DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\s_\-/,]+$").expect("Invalid description regex"));
static ETHERNET_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Ethernet[1-9][0-9]{0,2}(/[1-9][0-9]{0,2})*$").expect("Invalid port regex"));
static PORT_CHANNEL_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Port-Channel\d+$").expect("Invalid port-channel regex"));
static BGP_GROUP_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]*$").expect("Invalid group name regex"));
static TRUNK_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid trunk group regex"));

/// Values a client is allowed to push to a switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPolicy {
    pub allowed_vlans: BTreeSet<i64>,
    pub allowed_native_vlans: BTreeSet<i64>,
    /// VLANs on which LLDP transmit stays enabled
    pub provisioning_vlans: BTreeSet<i64>,
    pub allowed_modes: Vec<String>,
    /// Empty = any well-formed trunk group
    pub allowed_trunk_groups: Vec<String>,
}

impl ClientPolicy {
    /// Builds a policy from range strings like `"100-3999,4008"`
    pub fn from_ranges(
        allowed_vlans: &str,
        allowed_native_vlans: &str,
        provisioning_vlans: &str,
        allowed_modes: &[&str],
        allowed_trunk_groups: &[&str],
    ) -> Result<Self, SwitchClientError> {
        Ok(Self {
            allowed_vlans: expand_vlan_ranges(allowed_vlans)?,
            allowed_native_vlans: expand_vlan_ranges(allowed_native_vlans)?,
            provisioning_vlans: expand_vlan_ranges(provisioning_vlans)?,
            allowed_modes: allowed_modes.iter().map(|m| m.to_string()).collect(),
            allowed_trunk_groups: allowed_trunk_groups.iter().map(|g| g.to_string()).collect(),
        })
    }

    pub fn validate_vlan(&self, vlan: i64) -> Result<(), SwitchClientError> {
        validate_vlan_value(vlan, &self.allowed_vlans)
    }

    pub fn validate_native_vlan(&self, vlan: i64) -> Result<(), SwitchClientError> {
        validate_vlan_value(vlan, &self.allowed_native_vlans)
    }

    pub fn validate_mode(&self, mode: &str) -> Result<(), SwitchClientError> {
        if !self.allowed_modes.iter().any(|m| m == mode) {
            return Err(SwitchClientError::Validation(format!(
                "Mode {} is not allowed mode value",
                mode
            )));
        }
        Ok(())
    }

    pub fn validate_trunk_groups(&self, groups: &[String]) -> Result<(), SwitchClientError> {
        for group in groups {
            if group.len() > MAX_TRUNK_GROUP_LENGTH {
                return Err(SwitchClientError::Validation(format!(
                    "trunk group {} is longer than {} characters",
                    group, MAX_TRUNK_GROUP_LENGTH
                )));
            }
            if !TRUNK_GROUP.is_match(group) {
                return Err(SwitchClientError::Validation(format!(
                    "trunk group {} contains invalid characters",
                    group
                )));
            }
            if !self.allowed_trunk_groups.is_empty() && !self.allowed_trunk_groups.contains(group) {
                return Err(SwitchClientError::Validation(format!(
                    "trunk group {} not in allowed trunk groups given in config",
                    group
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_provisioning_vlan(&self, vlan: i64) -> bool {
        self.provisioning_vlans.contains(&vlan)
    }
}

/// Expands `"100-103,4008"` into the set {100, 101, 102, 103, 4008}
pub fn expand_vlan_ranges(ranges: &str) -> Result<BTreeSet<i64>, SwitchClientError> {
    let mut vlans = BTreeSet::new();
    for part in ranges.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(caps) = VLAN_RANGE.captures(part) {
            let start = parse_vlan(&caps[1])?;
            let end = parse_vlan(&caps[2])?;
            if start >= end {
                return Err(SwitchClientError::Validation(format!(
                    "invalid VLAN range {}: start must be lower than end",
                    part
                )));
            }
            vlans.extend(start..=end);
        } else {
            vlans.insert(parse_vlan(part)?);
        }
    }
    Ok(vlans)
}

fn parse_vlan(value: &str) -> Result<i64, SwitchClientError> {
    value
        .parse::<i64>()
        .map_err(|_| SwitchClientError::Validation(format!("invalid VLAN value {}", value)))
}

pub fn validate_vlan_value(vlan: i64, allowed: &BTreeSet<i64>) -> Result<(), SwitchClientError> {
    if allowed.is_empty() {
        return Err(SwitchClientError::Validation("no allowed VLANs provided".to_string()));
    }
    if !allowed.contains(&vlan) {
        return Err(SwitchClientError::Validation(format!(
            "VLAN {} not in allowed VLANs given in config",
            vlan
        )));
    }
    Ok(())
}

/// Returns the trimmed description
pub fn validate_description(description: &str) -> Result<String, SwitchClientError> {
    let trimmed = description.trim();
    if trimmed.len() > MAX_DESCRIPTION_LENGTH {
        return Err(SwitchClientError::Validation(format!(
            "description is longer than {} characters",
            MAX_DESCRIPTION_LENGTH
        )));
    }
    if !DESCRIPTION.is_match(trimmed) {
        return Err(SwitchClientError::Validation(format!(
            "description {:?} contains invalid characters",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_port_name(port_name: &str) -> Result<(), SwitchClientError> {
    if ETHERNET_PORT.is_match(port_name) || PORT_CHANNEL_PORT.is_match(port_name) {
        return Ok(());
    }
    Err(SwitchClientError::Validation(format!("invalid port name {}", port_name)))
}

pub fn validate_bgp_community(community: i64) -> Result<(), SwitchClientError> {
    if !(0..=MAX_BGP_COMMUNITY).contains(&community) {
        return Err(SwitchClientError::Validation(format!(
            "BGP community {} out of range 0-{}",
            community, MAX_BGP_COMMUNITY
        )));
    }
    Ok(())
}

pub fn validate_bgp_group_name(group_name: &str) -> Result<(), SwitchClientError> {
    if group_name.is_empty() || group_name.len() > MAX_BGP_GROUP_NAME_LENGTH {
        return Err(SwitchClientError::Validation(format!(
            "community list name must be 1-{} characters",
            MAX_BGP_GROUP_NAME_LENGTH
        )));
    }
    if !BGP_GROUP_NAME.is_match(group_name) {
        return Err(SwitchClientError::Validation(format!(
            "community list name {} contains invalid characters",
            group_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ClientPolicy {
        ClientPolicy::from_ranges("100-3999,4008", "1,55", "4008", &["access", "trunk"], &[]).unwrap()
    }

    #[test]
    fn test_expand_vlan_ranges() {
        let vlans = expand_vlan_ranges("100-103, 4008").unwrap();
        assert_eq!(vlans.into_iter().collect::<Vec<_>>(), vec![100, 101, 102, 103, 4008]);
        assert!(expand_vlan_ranges("").unwrap().is_empty());
    }

    #[test]
    fn test_expand_vlan_ranges_rejects_reversed_range() {
        assert!(expand_vlan_ranges("200-100").is_err(), "Reversed range should fail");
        assert!(expand_vlan_ranges("100-100").is_err(), "Single-value range should fail");
        assert!(expand_vlan_ranges("abc").is_err(), "Non-numeric value should fail");
    }

    #[test]
    fn test_validate_vlan() {
        let policy = policy();
        assert!(policy.validate_vlan(100).is_ok());
        assert!(policy.validate_vlan(4008).is_ok());
        assert!(policy.validate_vlan(4000).is_err(), "VLAN outside ranges should fail");
        assert!(policy.validate_native_vlan(55).is_ok());
        assert!(policy.validate_native_vlan(100).is_err());
        assert!(policy.is_provisioning_vlan(4008));

        let empty = ClientPolicy::default();
        let err = empty.validate_vlan(100).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: no allowed VLANs provided");
    }

    #[test]
    fn test_validate_mode() {
        let policy = policy();
        assert!(policy.validate_mode("access").is_ok());
        assert!(policy.validate_mode("routed").is_err(), "Routed is not a writable mode");
    }

    #[test]
    fn test_validate_trunk_groups() {
        let mut policy = policy();
        assert!(policy.validate_trunk_groups(&["tenant_a".to_string(), "b-2".to_string()]).is_ok());
        assert!(policy.validate_trunk_groups(&["bad group".to_string()]).is_err());
        assert!(policy.validate_trunk_groups(&["x".repeat(33)]).is_err());

        policy.allowed_trunk_groups = vec!["tenant_a".to_string()];
        assert!(policy.validate_trunk_groups(&["tenant_a".to_string()]).is_ok());
        assert!(policy.validate_trunk_groups(&["tenant_b".to_string()]).is_err(), "Group outside allow-list should fail");
    }

    #[test]
    fn test_validate_description() {
        assert_eq!(validate_description("  rack 12, row-3/a  ").unwrap(), "rack 12, row-3/a");
        assert!(validate_description("drop; table").is_err());
        assert!(validate_description(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_port_name() {
        assert!(validate_port_name("Ethernet1").is_ok());
        assert!(validate_port_name("Ethernet27/1").is_ok());
        assert!(validate_port_name("Port-Channel12").is_ok());
        assert!(validate_port_name("Ethernet0").is_err());
        assert!(validate_port_name("Management1").is_err());
    }

    #[test]
    fn test_validate_bgp() {
        assert!(validate_bgp_community(0).is_ok());
        assert!(validate_bgp_community(65_535).is_ok());
        assert!(validate_bgp_community(65_536).is_err());
        assert!(validate_bgp_community(-1).is_err(), "No-op sentinel must never be written");
        assert!(validate_bgp_group_name("idc_dyn_comm_list").is_ok());
        assert!(validate_bgp_group_name("").is_err());
        assert!(validate_bgp_group_name("bad name").is_err());
    }
}
