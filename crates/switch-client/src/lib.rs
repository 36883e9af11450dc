//! Switch Client
//!
//! Per-switch command interface used by the SDN controller to read and
//! write interface, port-channel and BGP community configuration.
//!
//! # Example
//!
//! ```no_run
//! use switch_client::{ClientPolicy, EapiSwitchClient, SwitchClientTrait, SwitchCredentials, UpdateVlanRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = SwitchCredentials::from_file("/etc/sdn/switch-secrets.yaml")?;
//! let policy = ClientPolicy::from_ranges("100-3999,4008", "1,55", "4008", &["access", "trunk"], &[])?;
//! let client = EapiSwitchClient::new("10.0.0.1", 443, "https", credentials, policy, false)?;
//!
//! client.update_vlan(UpdateVlanRequest {
//!     switch_fqdn: "sw1.example.com".to_string(),
//!     port_name: "Ethernet5".to_string(),
//!     vlan: 100,
//!     update_lldp: true,
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! - **eAPI**: JSON-RPC `runCmds` over HTTPS
//! - **Read-only eAPI**: reads go to the switch, writes are validated and logged only
//! - **Mock** (`test-util` feature): in-memory switch with a call log and failure injection

pub mod eapi;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod switch_trait;
pub mod validation;
#[cfg(feature = "test-util")]
pub mod mock;

pub use eapi::EapiSwitchClient;
pub use error::SwitchClientError;
pub use models::*;
pub use switch_trait::SwitchClientTrait;
pub use validation::ClientPolicy;
#[cfg(feature = "test-util")]
pub use mock::MockSwitchClient;
