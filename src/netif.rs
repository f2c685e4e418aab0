//! Local network interface lookup.

use std::net::IpAddr;

use crate::BridgeError;

/// Returns the address of the interface used for outbound traffic.
///
/// This is the address the protocol server binds to and the address
/// advertised over mDNS. Loopback and unspecified addresses are rejected:
/// a remote sender could never reach them.
pub fn outbound_ip() -> Result<IpAddr, BridgeError> {
    let ip = local_ip_address::local_ip()
        .map_err(|e| BridgeError::backend("network", format!("no local address: {e}")))?;
    usable(ip)
}

fn usable(ip: IpAddr) -> Result<IpAddr, BridgeError> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(BridgeError::backend(
            "network",
            format!("outbound address {ip} is not reachable from the network"),
        ));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_rejects_loopback_and_unspecified() {
        assert!(usable(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_err());
        assert!(usable(IpAddr::V6(Ipv6Addr::UNSPECIFIED)).is_err());
    }

    #[test]
    fn test_accepts_lan_address() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(usable(ip).unwrap(), ip);
    }

    #[test]
    fn test_outbound_ip_doesnt_panic() {
        // May fail in sandboxed CI, but shouldn't panic
        let _ = outbound_ip();
    }
}
