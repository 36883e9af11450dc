//! Controller configuration
//!
//! Read from environment variables. Required variables fail startup with
//! `InvalidConfig`; everything else has a default.

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use switch_client::ClientPolicy;

/// Which switch client implementation the Device Access Manager builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchBackendMode {
    Mock,
    Eapi,
    ReadOnly,
}

impl FromStr for SwitchBackendMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(SwitchBackendMode::Mock),
            "eapi" => Ok(SwitchBackendMode::Eapi),
            "readonly" | "read-only" => Ok(SwitchBackendMode::ReadOnly),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown switch backend mode {}",
                other
            ))),
        }
    }
}

/// Where NodeGroup to Pool assignments come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMappingSource {
    /// Watch NodeGroupToPoolMapping records
    Crd,
    /// Poll a JSON file
    File,
}

impl FromStr for PoolMappingSource {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crd" => Ok(PoolMappingSource::Crd),
            "file" => Ok(PoolMappingSource::File),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown pool mapping source {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub namespace: String,
    pub switch_secrets_path: PathBuf,
    /// `:`-separated datacenter names used to validate switch FQDNs
    pub data_center: String,
    pub backend_mode: SwitchBackendMode,
    pub max_concurrent_reconciles: u16,

    pub port_resync_period: Duration,
    pub network_node_resync_period: Duration,
    pub node_group_resync_period: Duration,
    pub switch_resync_period: Duration,
    pub status_report_period: Duration,
    pub status_report_accelerated_period: Duration,

    pub bgp_community_group: String,
    pub port_channels_enabled: bool,

    pub allowed_vlan_ids: String,
    pub allowed_native_vlan_ids: String,
    pub provisioning_vlan_ids: String,
    pub allowed_modes: Vec<String>,
    pub allowed_trunk_groups: Vec<String>,

    pub pool_config_path: PathBuf,
    pub pool_mapping_source: PoolMappingSource,
    pub pool_mapping_file_path: PathBuf,
    pub pool_manager_enabled: bool,
    pub use_default_value_in_pool_for_moving_node_group: bool,
    /// JSON list of reserved NetworkNodes; unset means nothing is reserved
    pub node_usage_file_path: Option<PathBuf>,

    pub health_bind_address: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "idcs-system".to_string(),
            switch_secrets_path: PathBuf::new(),
            data_center: String::new(),
            backend_mode: SwitchBackendMode::Mock,
            max_concurrent_reconciles: 10,
            port_resync_period: Duration::from_secs(60),
            network_node_resync_period: Duration::from_secs(60),
            node_group_resync_period: Duration::from_secs(60),
            switch_resync_period: Duration::from_secs(60),
            status_report_period: Duration::from_secs(20),
            status_report_accelerated_period: Duration::from_secs(1),
            bgp_community_group: "idc_dyn_comm_list".to_string(),
            port_channels_enabled: false,
            allowed_vlan_ids: "100-3999,4008".to_string(),
            allowed_native_vlan_ids: "1,55".to_string(),
            provisioning_vlan_ids: "4008".to_string(),
            allowed_modes: vec!["access".to_string(), "trunk".to_string()],
            allowed_trunk_groups: Vec::new(),
            pool_config_path: PathBuf::from("/etc/sdn/pools.json"),
            pool_mapping_source: PoolMappingSource::Crd,
            pool_mapping_file_path: PathBuf::from("/etc/sdn/mappings.json"),
            pool_manager_enabled: true,
            use_default_value_in_pool_for_moving_node_group: true,
            node_usage_file_path: None,
            health_bind_address: "0.0.0.0:8081".to_string(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` (environment in production, a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut problems = Vec::new();

        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: Duration, problems: &mut Vec<String>| match lookup(key) {
            Some(v) => v.parse::<u64>().map(Duration::from_secs).unwrap_or_else(|_| {
                problems.push(format!("{} must be a number of seconds, got {}", key, v));
                default
            }),
            None => default,
        };
        let flag = |key: &str, default: bool, problems: &mut Vec<String>| match lookup(key) {
            Some(v) => v.parse::<bool>().unwrap_or_else(|_| {
                problems.push(format!("{} must be true or false, got {}", key, v));
                default
            }),
            None => default,
        };

        let switch_secrets_path = lookup("SWITCH_SECRETS_PATH").map(PathBuf::from).ok_or_else(|| {
            ControllerError::InvalidConfig("SWITCH_SECRETS_PATH environment variable is required".to_string())
        })?;
        let data_center = lookup("DATA_CENTER").ok_or_else(|| {
            ControllerError::InvalidConfig("DATA_CENTER environment variable is required".to_string())
        })?;

        let mut backend_mode = SwitchBackendMode::from_str(&string("SWITCH_BACKEND_MODE", "mock"))
            .unwrap_or_else(|e| {
                problems.push(e.to_string());
                defaults.backend_mode
            });
        if flag("SWITCH_READ_ONLY", false, &mut problems) {
            backend_mode = SwitchBackendMode::ReadOnly;
        }

        let max_concurrent_reconciles = match lookup("MAX_CONCURRENT_RECONCILES") {
            Some(v) => v.parse::<u16>().unwrap_or_else(|_| {
                problems.push(format!("MAX_CONCURRENT_RECONCILES must be a number, got {}", v));
                defaults.max_concurrent_reconciles
            }),
            None => defaults.max_concurrent_reconciles,
        };

        let pool_mapping_source = PoolMappingSource::from_str(&string("POOL_MAPPING_SOURCE", "crd"))
            .unwrap_or_else(|e| {
                problems.push(e.to_string());
                defaults.pool_mapping_source
            });

        let config = Self {
            namespace: string("WATCH_NAMESPACE", &defaults.namespace),
            switch_secrets_path,
            data_center,
            backend_mode,
            max_concurrent_reconciles,
            port_resync_period: secs("PORT_RESYNC_PERIOD_SECS", defaults.port_resync_period, &mut problems),
            network_node_resync_period: secs(
                "NETWORK_NODE_RESYNC_PERIOD_SECS",
                defaults.network_node_resync_period,
                &mut problems,
            ),
            node_group_resync_period: secs(
                "NODE_GROUP_RESYNC_PERIOD_SECS",
                defaults.node_group_resync_period,
                &mut problems,
            ),
            switch_resync_period: secs("SWITCH_RESYNC_PERIOD_SECS", defaults.switch_resync_period, &mut problems),
            status_report_period: secs("STATUS_REPORT_PERIOD_SECS", defaults.status_report_period, &mut problems),
            status_report_accelerated_period: secs(
                "STATUS_REPORT_ACCELERATED_PERIOD_SECS",
                defaults.status_report_accelerated_period,
                &mut problems,
            ),
            bgp_community_group: string("SWITCH_BGP_COMMUNITY_GROUP", &defaults.bgp_community_group),
            port_channels_enabled: flag("PORT_CHANNELS_ENABLED", defaults.port_channels_enabled, &mut problems),
            allowed_vlan_ids: string("ALLOWED_VLAN_IDS", &defaults.allowed_vlan_ids),
            allowed_native_vlan_ids: string("ALLOWED_NATIVE_VLAN_IDS", &defaults.allowed_native_vlan_ids),
            provisioning_vlan_ids: string("PROVISIONING_VLAN_IDS", &defaults.provisioning_vlan_ids),
            allowed_modes: lookup("ALLOWED_MODES").map_or(defaults.allowed_modes.clone(), |v| split_list(&v)),
            allowed_trunk_groups: lookup("ALLOWED_TRUNK_GROUPS").map_or_else(Vec::new, |v| split_list(&v)),
            pool_config_path: lookup("POOL_CONFIG_PATH").map_or(defaults.pool_config_path.clone(), PathBuf::from),
            pool_mapping_source,
            pool_mapping_file_path: lookup("POOL_MAPPING_FILE_PATH")
                .map_or(defaults.pool_mapping_file_path.clone(), PathBuf::from),
            pool_manager_enabled: flag("POOL_MANAGER_ENABLED", defaults.pool_manager_enabled, &mut problems),
            use_default_value_in_pool_for_moving_node_group: flag(
                "USE_DEFAULT_VALUE_IN_POOL_FOR_MOVING_NODE_GROUP",
                defaults.use_default_value_in_pool_for_moving_node_group,
                &mut problems,
            ),
            node_usage_file_path: lookup("NODE_USAGE_FILE_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            health_bind_address: string("HEALTH_BIND_ADDRESS", &defaults.health_bind_address),
        };

        if !problems.is_empty() {
            return Err(ControllerError::InvalidConfig(problems.join("; ")));
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints, reporting every problem at once
    pub fn validate(&self) -> Result<(), ControllerError> {
        let mut problems = Vec::new();

        if self.namespace.is_empty() {
            problems.push("WATCH_NAMESPACE must not be empty".to_string());
        }
        if self.max_concurrent_reconciles == 0 {
            problems.push("MAX_CONCURRENT_RECONCILES must be greater than 0".to_string());
        }
        for (name, period) in [
            ("PORT_RESYNC_PERIOD_SECS", self.port_resync_period),
            ("NETWORK_NODE_RESYNC_PERIOD_SECS", self.network_node_resync_period),
            ("NODE_GROUP_RESYNC_PERIOD_SECS", self.node_group_resync_period),
            ("SWITCH_RESYNC_PERIOD_SECS", self.switch_resync_period),
            ("STATUS_REPORT_PERIOD_SECS", self.status_report_period),
            ("STATUS_REPORT_ACCELERATED_PERIOD_SECS", self.status_report_accelerated_period),
        ] {
            if period.is_zero() {
                problems.push(format!("{} must be greater than 0", name));
            }
        }
        for mode in &self.allowed_modes {
            if mode != crds::MODE_ACCESS && mode != crds::MODE_TRUNK {
                problems.push(format!("ALLOWED_MODES contains unsupported mode {}", mode));
            }
        }
        if let Err(e) = self.client_policy() {
            problems.push(e.to_string());
        }
        if self.bgp_community_group.is_empty() {
            problems.push("SWITCH_BGP_COMMUNITY_GROUP must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Validation policy handed to every switch client
    pub fn client_policy(&self) -> Result<ClientPolicy, ControllerError> {
        let modes: Vec<&str> = self.allowed_modes.iter().map(String::as_str).collect();
        let groups: Vec<&str> = self.allowed_trunk_groups.iter().map(String::as_str).collect();
        ClientPolicy::from_ranges(
            &self.allowed_vlan_ids,
            &self.allowed_native_vlan_ids,
            &self.provisioning_vlan_ids,
            &modes,
            &groups,
        )
        .map_err(|e| ControllerError::InvalidConfig(e.to_string()))
    }
}
