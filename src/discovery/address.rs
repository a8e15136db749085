//! Address and port resolution for discovered peers and the local server

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tracing::{debug, error, warn};
use url::Url;

/// Address family of a [`PeerAddress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// A numeric ip, port and family triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub family: AddressFamily,
}

impl PeerAddress {
    /// Returned when a raw address cannot be resolved numerically
    pub const UNRESOLVED: PeerAddress = PeerAddress {
        ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: 0,
        family: AddressFamily::Ipv4,
    };

    pub fn new(ip: IpAddr, port: u16) -> Self {
        let family = match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        };
        Self { ip, port, family }
    }

    /// Build from a socket address, optionally replacing its port
    pub fn resolve(raw: &SocketAddr, override_port: Option<u16>) -> Self {
        // Mapped v4 addresses are reported as plain ipv4 so url building and
        // address preference treat them like any other v4 peer.
        let ip = match raw.ip() {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self::new(ip, override_port.unwrap_or_else(|| raw.port()))
    }

    /// Numeric lookup of a textual address.
    ///
    /// Accepts `ip`, `ip:port`, `[ipv6]:port` and ipv6 literals carrying a
    /// `%interface` scope suffix, which is stripped. Never performs DNS; on
    /// failure the [`PeerAddress::UNRESOLVED`] sentinel is returned.
    pub fn parse(raw: &str, override_port: Option<u16>) -> Self {
        let raw = raw.trim();

        if let Ok(sock) = raw.parse::<SocketAddr>() {
            return Self::resolve(&sock, override_port);
        }

        let (host, port) = split_host_port(raw);
        let host = strip_scope(host);

        match host.parse::<IpAddr>() {
            Ok(ip) => {
                let sock = SocketAddr::new(ip, port.unwrap_or(0));
                Self::resolve(&sock, override_port)
            }
            Err(_) => {
                warn!("Could not resolve '{}' numerically", raw);
                Self::UNRESOLVED
            }
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.family == AddressFamily::Ipv4
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// `https://ip:port/path`, with ipv6 literals bracketed
    pub fn url(&self, path: &str) -> Option<Url> {
        let path = path.trim_start_matches('/');
        let text = match self.family {
            AddressFamily::Ipv6 => format!("https://[{}]:{}/{}", self.ip, self.port, path),
            AddressFamily::Ipv4 => format!("https://{}:{}/{}", self.ip, self.port, path),
        };
        Url::parse(&text).ok()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.family {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        };
        write!(f, "{}:{} {}", self.ip, self.port, family)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::resolve(&addr, None)
    }
}

fn split_host_port(raw: &str) -> (&str, Option<u16>) {
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    // A single colon means host:port, more than one is a bare ipv6 literal
    if raw.matches(':').count() == 1 {
        if let Some((host, port)) = raw.split_once(':') {
            return (host, port.parse().ok());
        }
    }
    (raw, None)
}

fn strip_scope(host: &str) -> &str {
    match host.split_once('%') {
        Some((addr, _scope)) => addr,
        None => host,
    }
}

/// Ask the OS for a free port by binding an ephemeral datagram socket.
///
/// The socket is released before returning, so the port is only momentarily
/// reserved.
pub fn available_port() -> Option<PeerAddress> {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to bind ephemeral socket: {}", e);
            return None;
        }
    };

    match socket.local_addr() {
        Ok(addr) => {
            debug!("Allocated ephemeral port {}", addr.port());
            Some(PeerAddress::resolve(&addr, None))
        }
        Err(e) => {
            error!("Failed to read ephemeral socket address: {}", e);
            None
        }
    }
}

/// Addresses of the single interface designated for LAN discovery.
///
/// Every other interface is excluded so that cellular, VPN and loopback
/// addresses are never advertised.
pub fn available_addresses(interface: &str, override_port: Option<u16>) -> Vec<PeerAddress> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .iter()
        .filter(|iface| iface.name == interface)
        .map(|iface| PeerAddress::new(iface.ip(), override_port.unwrap_or(0)))
        .collect()
}

/// Every non-loopback ipv4 address of this host
pub fn lan_ipv4_addresses(override_port: Option<u16>) -> Vec<PeerAddress> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .iter()
        .filter(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| PeerAddress::new(iface.ip(), override_port.unwrap_or(0)))
        .collect()
}

/// First non-loopback interface carrying an ipv4 address
pub fn default_interface() -> Option<String> {
    let interfaces = if_addrs::get_if_addrs().ok()?;
    interfaces
        .iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv6Addr, TcpListener};

    #[test]
    fn test_parse_strips_scope_suffix() {
        let addr = PeerAddress::parse("fe80::1c2a:3bff:fe4d:5e6f%en0", Some(8080));
        assert_eq!(addr.family, AddressFamily::Ipv6);
        assert_eq!(addr.port, 8080);
        assert_eq!(
            addr.ip,
            "fe80::1c2a:3bff:fe4d:5e6f".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_bracketed_with_scope_and_port() {
        let addr = PeerAddress::parse("[fe80::1%eth0]:9000", None);
        assert_eq!(addr.port, 9000);
        assert_eq!(addr.ip, "fe80::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_parse_ipv4_with_port() {
        let addr = PeerAddress::parse("192.168.1.20:4242", None);
        assert!(addr.is_ipv4());
        assert_eq!(addr.port, 4242);
    }

    #[test]
    fn test_parse_never_uses_dns() {
        assert_eq!(PeerAddress::parse("localhost:80", None), PeerAddress::UNRESOLVED);
        assert_eq!(PeerAddress::parse("not an address", None), PeerAddress::UNRESOLVED);
    }

    #[test]
    fn test_resolve_override_port() {
        let sock: SocketAddr = "10.0.0.2:1000".parse().unwrap();
        assert_eq!(PeerAddress::resolve(&sock, Some(2000)).port, 2000);
        assert_eq!(PeerAddress::resolve(&sock, None).port, 1000);
    }

    #[test]
    fn test_resolve_unmaps_ipv4_mapped() {
        let mapped = Ipv4Addr::new(192, 168, 0, 7).to_ipv6_mapped();
        let sock = SocketAddr::new(IpAddr::V6(mapped), 80);
        let addr = PeerAddress::resolve(&sock, None);
        assert!(addr.is_ipv4());
        assert_eq!(addr.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7)));
    }

    #[test]
    fn test_url_brackets_ipv6_only() {
        let v6 = PeerAddress::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8443);
        assert_eq!(v6.url("status").unwrap().as_str(), "https://[::1]:8443/status");

        let v4 = PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 8443);
        assert_eq!(v4.url("/pull").unwrap().as_str(), "https://10.1.2.3:8443/pull");
    }

    #[test]
    fn test_available_port_is_bindable() {
        let addr = available_port().expect("ephemeral port");
        assert!(addr.port > 0);

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, addr.port));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_available_addresses_only_designated_interface() {
        if let Some(interface) = default_interface() {
            let addresses = available_addresses(&interface, Some(1234));
            assert!(addresses.iter().any(|a| a.is_ipv4()));
            assert!(addresses.iter().all(|a| a.port == 1234));
        }

        assert!(available_addresses("no-such-interface0", None).is_empty());
    }
}
