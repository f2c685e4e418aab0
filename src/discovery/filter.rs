//! Device matching by exact IP or name pattern.

use std::fmt;
use std::net::IpAddr;

use regex::Regex;

use crate::discovery::Device;
use crate::{BridgeError, SearchType};

/// Selects the device a sender output should connect to.
#[derive(Debug, Clone)]
pub enum DeviceFilter {
    /// Exact address match.
    Ip(IpAddr),
    /// Regular expression over the advertised name.
    Name(Regex),
}

impl DeviceFilter {
    /// Builds a filter from exactly one of an IP and a name pattern.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if both or neither are given, the IP
    /// does not parse, or the pattern does not compile.
    pub fn from_parts(ip: Option<&str>, name_pattern: Option<&str>) -> Result<Self, BridgeError> {
        let ip = ip.filter(|s| !s.trim().is_empty());
        let name_pattern = name_pattern.filter(|s| !s.trim().is_empty());

        match (ip, name_pattern) {
            (Some(ip), None) => ip
                .trim()
                .parse()
                .map(Self::Ip)
                .map_err(|_| BridgeError::config(format!("could not parse IP address '{ip}'"))),
            (None, Some(pattern)) => Regex::new(pattern)
                .map(Self::Name)
                .map_err(|e| BridgeError::config(format!("invalid name pattern: {e}"))),
            (Some(_), Some(_)) => Err(BridgeError::config(
                "give either a device IP or a name pattern, not both",
            )),
            (None, None) => Err(BridgeError::config(
                "either a device IP or a name pattern is required",
            )),
        }
    }

    /// Builds a filter from a control-plane search key.
    pub fn from_search(key: &str, search_type: SearchType) -> Result<Self, BridgeError> {
        match search_type {
            SearchType::Ip => Self::from_parts(Some(key), None),
            SearchType::Name => Self::from_parts(None, Some(key)),
        }
    }

    /// Returns `true` if `device` is a sink satisfying the filter.
    ///
    /// Non-sink devices never match, whatever their name or address.
    pub fn matches(&self, device: &Device) -> bool {
        if !device.is_sink() {
            return false;
        }
        match self {
            Self::Ip(ip) => device.ip == *ip,
            Self::Name(pattern) => pattern.is_match(&device.name),
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip {ip}"),
            Self::Name(pattern) => write!(f, "name /{}/", pattern.as_str()),
        }
    }
}
