//! Record naming helpers
//!
//! SwitchPort and PortChannel record names encode the interface and its
//! switch, because interface names like "Ethernet27/1" or
//! "Port-Channel12" are not valid object names.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Errors produced while building or parsing record names
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("invalid switch FQDN: {0}")]
    InvalidFqdn(String),

    #[error("invalid Port-Channel name: {0}")]
    InvalidPortChannelName(String),

    #[error("invalid port channel number: {0}")]
    InvalidPortChannelNumber(i64),

    #[error("invalid SwitchPort record name: {0}")]
    InvalidSwitchPortName(String),
}

/// Largest port-channel number accepted by the switches
pub const MAX_PORT_CHANNEL_NUMBER: i64 = 999_999;

static PORT_CHANNEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Port-Channel(\d+)$").expect("Invalid port-channel regex"));

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("Invalid hostname regex")
});

/// `Ethernet27/1` on `sw1.example.com` => `ethernet27-1.sw1.example.com`
#[must_use]
pub fn port_full_name(switch_fqdn: &str, port_name: &str) -> String {
    format!("{}.{}", port_name.to_lowercase(), switch_fqdn.to_lowercase()).replace('/', "-")
}

/// `ethernet27-1.sw1.example.com` => (`Ethernet27/1`, `sw1.example.com`)
pub fn port_full_name_to_port_and_switch(record_name: &str) -> Result<(String, String), NamingError> {
    let (port, fqdn) = record_name
        .split_once('.')
        .ok_or_else(|| NamingError::InvalidSwitchPortName(record_name.to_string()))?;
    if port.is_empty() || fqdn.is_empty() {
        return Err(NamingError::InvalidSwitchPortName(record_name.to_string()));
    }

    let port = port.replace('-', "/");
    let mut chars = port.chars();
    let port = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Ok((port, fqdn.to_string()))
}

/// Validates a switch FQDN.
///
/// `data_centers` is an optional `:`-separated list; when given, the text
/// before the first `-` of the FQDN must be one of them.
pub fn validate_switch_fqdn(switch_fqdn: &str, data_centers: &str) -> Result<(), NamingError> {
    if switch_fqdn.is_empty() {
        return Err(NamingError::InvalidFqdn("switch FQDN was empty".to_string()));
    }

    if !data_centers.is_empty() {
        let (prefix, _) = switch_fqdn
            .split_once('-')
            .ok_or_else(|| NamingError::InvalidFqdn(format!("{} has no data center prefix", switch_fqdn)))?;
        if !data_centers.split(':').any(|dc| dc == prefix) {
            return Err(NamingError::InvalidFqdn(format!(
                "the switch {} doesn't belong to the data center/s [{}]",
                switch_fqdn, data_centers
            )));
        }
    }

    if switch_fqdn.len() > 253 || !HOSTNAME.is_match(switch_fqdn) {
        return Err(NamingError::InvalidFqdn(switch_fqdn.to_string()));
    }
    Ok(())
}

pub fn validate_port_channel_number(number: i64) -> Result<(), NamingError> {
    if number <= 0 || number > MAX_PORT_CHANNEL_NUMBER {
        return Err(NamingError::InvalidPortChannelNumber(number));
    }
    Ok(())
}

/// `Port-Channel24` => 24
pub fn port_channel_name_to_number(name: &str) -> Result<i64, NamingError> {
    let caps = PORT_CHANNEL_NAME
        .captures(name)
        .ok_or_else(|| NamingError::InvalidPortChannelName(name.to_string()))?;
    let number = caps[1]
        .parse::<i64>()
        .map_err(|_| NamingError::InvalidPortChannelName(name.to_string()))?;
    validate_port_channel_number(number)?;
    Ok(number)
}

/// 24 => `Port-Channel24`
pub fn port_channel_number_to_name(number: i64) -> Result<String, NamingError> {
    validate_port_channel_number(number)?;
    Ok(format!("Port-Channel{}", number))
}

/// 24 on `sw1.example.com` => `po24.sw1.example.com`
pub fn port_channel_record_name(number: i64, switch_fqdn: &str) -> Result<String, NamingError> {
    validate_port_channel_number(number)?;
    validate_switch_fqdn(switch_fqdn, "")?;
    Ok(format!("po{}.{}", number, switch_fqdn))
}

/// Whether an interface name is a port-channel
#[must_use]
pub fn is_port_channel_name(name: &str) -> bool {
    PORT_CHANNEL_NAME.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_full_name_lowercases_and_replaces_slashes() {
        assert_eq!(
            port_full_name("SW1.example.com", "Ethernet27/1"),
            "ethernet27-1.sw1.example.com"
        );
        assert_eq!(port_full_name("sw1", "Ethernet5"), "ethernet5.sw1");
    }

    #[test]
    fn test_port_full_name_parses_back() {
        let (port, fqdn) = port_full_name_to_port_and_switch("ethernet27-1.sw1.example.com").unwrap();
        assert_eq!(port, "Ethernet27/1");
        assert_eq!(fqdn, "sw1.example.com");
    }

    #[test]
    fn test_port_full_name_without_switch_is_rejected() {
        assert!(port_full_name_to_port_and_switch("ethernet5").is_err(), "Name without a dot should fail");
        assert!(port_full_name_to_port_and_switch(".sw1").is_err(), "Empty port should fail");
    }

    #[test]
    fn test_validate_switch_fqdn_data_center_prefix() {
        assert!(validate_switch_fqdn("pdx05-c01-acsw001.example.com", "pdx05:phx04").is_ok());
        assert!(validate_switch_fqdn("fxhb3p3r-zal0112a.example.com", "pdx05").is_err(), "Foreign data center should fail");
        assert!(validate_switch_fqdn("nodash.example.com", "pdx05").is_err(), "Missing prefix should fail");
        assert!(validate_switch_fqdn("", "").is_err(), "Empty FQDN should fail");
        assert!(validate_switch_fqdn("clab-fabric-leaf2", "").is_ok());
        assert!(validate_switch_fqdn("bad_name.example.com", "").is_err(), "Underscore is not a hostname character");
    }

    #[test]
    fn test_port_channel_names() {
        assert_eq!(port_channel_name_to_number("Port-Channel24").unwrap(), 24);
        assert!(port_channel_name_to_number("Port-Channel0").is_err(), "Zero is not a valid port-channel");
        assert!(port_channel_name_to_number("Ethernet1").is_err());
        assert_eq!(port_channel_number_to_name(7).unwrap(), "Port-Channel7");
        assert_eq!(
            port_channel_number_to_name(1_000_000),
            Err(NamingError::InvalidPortChannelNumber(1_000_000))
        );
        assert_eq!(port_channel_record_name(12, "sw1.example.com").unwrap(), "po12.sw1.example.com");
        assert!(is_port_channel_name("Port-Channel3"));
        assert!(!is_port_channel_name("Ethernet3"));
    }
}
