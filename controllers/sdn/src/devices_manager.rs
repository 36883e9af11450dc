//! Device Access Manager
//!
//! Owns the registry of live switch clients keyed by switch FQDN. A client
//! is rebuilt when the switch's management address or the shared
//! credentials change. The registry lock only guards map updates; clients
//! are built and used outside it.

use crate::config::{ControllerConfig, SwitchBackendMode};
use crate::error::ControllerError;
use crds::Switch;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use switch_client::{ClientPolicy, EapiSwitchClient, MockSwitchClient, SwitchClientTrait, SwitchCredentials};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CREDENTIALS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Where and how to reach one switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTarget {
    pub fqdn: String,
    pub host: String,
    pub port: u16,
    pub transport: String,
}

impl SwitchTarget {
    pub fn from_switch(switch: &Switch) -> Self {
        let eapi = switch.spec.eapi_conf.clone().unwrap_or_default();
        let host = if switch.spec.ip.is_empty() {
            switch.spec.fqdn.clone()
        } else {
            switch.spec.ip.clone()
        };
        Self {
            fqdn: switch.spec.fqdn.clone(),
            host,
            port: eapi.port,
            transport: eapi.transport,
        }
    }
}

/// Builds switch clients for the configured backend
pub trait SwitchClientFactory: Send + Sync {
    fn build(
        &self,
        target: &SwitchTarget,
        credentials: &SwitchCredentials,
    ) -> Result<Arc<dyn SwitchClientTrait>, ControllerError>;
}

/// Real device clients, optionally read-only
pub struct EapiClientFactory {
    policy: ClientPolicy,
    read_only: bool,
}

impl EapiClientFactory {
    pub fn new(policy: ClientPolicy, read_only: bool) -> Self {
        Self { policy, read_only }
    }
}

impl SwitchClientFactory for EapiClientFactory {
    fn build(
        &self,
        target: &SwitchTarget,
        credentials: &SwitchCredentials,
    ) -> Result<Arc<dyn SwitchClientTrait>, ControllerError> {
        let client = EapiSwitchClient::new(
            &target.host,
            target.port,
            &target.transport,
            credentials.clone(),
            self.policy.clone(),
            self.read_only,
        )
        .map_err(|e| ControllerError::SwitchTransport(format!("{}: {}", target.fqdn, e)))?;
        Ok(Arc::new(client))
    }
}

/// Every switch shares one in-memory fabric
pub struct MockClientFactory {
    mock: MockSwitchClient,
}

impl MockClientFactory {
    pub fn new(mock: MockSwitchClient) -> Self {
        Self { mock }
    }
}

impl SwitchClientFactory for MockClientFactory {
    fn build(
        &self,
        _target: &SwitchTarget,
        _credentials: &SwitchCredentials,
    ) -> Result<Arc<dyn SwitchClientTrait>, ControllerError> {
        Ok(Arc::new(self.mock.clone()))
    }
}

/// Selects the factory for the configured backend mode
pub fn factory_for(config: &ControllerConfig) -> Result<Arc<dyn SwitchClientFactory>, ControllerError> {
    let policy = config.client_policy()?;
    Ok(match config.backend_mode {
        SwitchBackendMode::Mock => Arc::new(MockClientFactory::new(MockSwitchClient::new().with_policy(policy))),
        SwitchBackendMode::Eapi => Arc::new(EapiClientFactory::new(policy, false)),
        SwitchBackendMode::ReadOnly => Arc::new(EapiClientFactory::new(policy, true)),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionKey {
    target: SwitchTarget,
    credentials_generation: u64,
}

struct DeviceEntry {
    key: ConnectionKey,
    client: Arc<dyn SwitchClientTrait>,
}

struct CredentialState {
    credentials: SwitchCredentials,
    raw: String,
    generation: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of switch clients
pub struct DevicesAccessManager {
    factory: Arc<dyn SwitchClientFactory>,
    credentials_path: Option<PathBuf>,
    data_centers: String,
    credentials: Mutex<CredentialState>,
    devices: Mutex<HashMap<String, DeviceEntry>>,
}

impl DevicesAccessManager {
    /// Loads credentials from `credentials_path` (YAML `credentials: {username, password}`)
    pub fn new(
        factory: Arc<dyn SwitchClientFactory>,
        credentials_path: PathBuf,
        data_centers: &str,
    ) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(&credentials_path).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "failed to read switch credentials {}: {}",
                credentials_path.display(),
                e
            ))
        })?;
        let credentials = SwitchCredentials::from_yaml(&raw)?;
        let mut manager = Self::with_credentials(factory, credentials, data_centers);
        manager.credentials_path = Some(credentials_path);
        lock(&manager.credentials).raw = raw;
        Ok(manager)
    }

    /// Fixed credentials, no file to watch
    pub fn with_credentials(
        factory: Arc<dyn SwitchClientFactory>,
        credentials: SwitchCredentials,
        data_centers: &str,
    ) -> Self {
        Self {
            factory,
            credentials_path: None,
            data_centers: data_centers.to_string(),
            credentials: Mutex::new(CredentialState {
                credentials,
                raw: String::new(),
                generation: 0,
            }),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Registers or refreshes the client for a switch.
    /// Returns true when a client was (re)built.
    pub fn add_or_update_switch(&self, switch: &Switch) -> Result<bool, ControllerError> {
        crds::validate_switch_fqdn(&switch.spec.fqdn, &self.data_centers)?;
        let target = SwitchTarget::from_switch(switch);

        let (credentials, generation) = {
            let state = lock(&self.credentials);
            (state.credentials.clone(), state.generation)
        };
        let key = ConnectionKey {
            target: target.clone(),
            credentials_generation: generation,
        };

        if lock(&self.devices).get(&target.fqdn).is_some_and(|e| e.key == key) {
            return Ok(false);
        }

        let client = self.factory.build(&target, &credentials)?;
        info!("Switch client ready for {} at {}:{}", target.fqdn, target.host, target.port);
        lock(&self.devices).insert(target.fqdn.clone(), DeviceEntry { key, client });
        Ok(true)
    }

    pub fn remove_switch(&self, fqdn: &str) {
        if lock(&self.devices).remove(fqdn).is_some() {
            info!("Removed switch client for {}", fqdn);
        }
    }

    pub fn get_switch_client(&self, fqdn: &str) -> Result<Arc<dyn SwitchClientTrait>, ControllerError> {
        lock(&self.devices)
            .get(fqdn)
            .map(|e| Arc::clone(&e.client))
            .ok_or_else(|| ControllerError::NotFound(format!("no switch client for {}", fqdn)))
    }

    /// Re-reads the credential file; on change rebuilds every client.
    /// Returns true when the credentials changed.
    pub fn reload_credentials(&self) -> Result<bool, ControllerError> {
        let Some(path) = &self.credentials_path else {
            return Ok(false);
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to read switch credentials {}: {}", path.display(), e))
        })?;
        if lock(&self.credentials).raw == raw {
            return Ok(false);
        }
        let credentials = SwitchCredentials::from_yaml(&raw)?;
        {
            let mut state = lock(&self.credentials);
            state.credentials = credentials;
            state.raw = raw;
            state.generation += 1;
        }
        info!("Switch credentials changed, rebuilding clients");
        self.rebuild_all();
        Ok(true)
    }

    /// Rebuilds every registered client with the current credentials. An
    /// entry removed or replaced while its client was being built is left
    /// as it is.
    fn rebuild_all(&self) {
        let (credentials, generation) = {
            let state = lock(&self.credentials);
            (state.credentials.clone(), state.generation)
        };
        let snapshot: Vec<ConnectionKey> = lock(&self.devices).values().map(|e| e.key.clone()).collect();

        for previous in snapshot {
            let target = &previous.target;
            let client = match self.factory.build(target, &credentials) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Failed to rebuild client for {}: {}", target.fqdn, e);
                    continue;
                }
            };
            let mut devices = lock(&self.devices);
            match devices.get_mut(&target.fqdn) {
                Some(entry) if entry.key == previous => {
                    *entry = DeviceEntry {
                        key: ConnectionKey {
                            target: target.clone(),
                            credentials_generation: generation,
                        },
                        client,
                    };
                }
                Some(_) => debug!("Client for {} changed during rebuild, keeping it", target.fqdn),
                None => debug!("Switch {} removed during rebuild", target.fqdn),
            }
        }
    }

    /// Polls the credential file until cancelled
    pub async fn watch_credentials(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Credential watcher stopped");
                    return;
                }
                _ = tokio::time::sleep(CREDENTIALS_POLL_INTERVAL) => {
                    if let Err(e) = self.reload_credentials() {
                        warn!("Failed to reload switch credentials: {}", e);
                    }
                }
            }
        }
    }
}
