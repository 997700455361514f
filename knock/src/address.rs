//! Listening endpoint of the server.
//!
//! The same [`ServerAddress`] names the socket the accept loop binds and the
//! socket the unblock probe dials, so the two can never drift apart.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Default bind host: every IPv4 interface.
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Host and port the server listens on. Fixed for the lifetime of a process.
///
/// # Example
///
/// ```rust
/// use knock::ServerAddress;
///
/// let address = ServerAddress::default();
/// assert_eq!(address.to_string(), "0.0.0.0:8080");
/// assert_eq!(address.dial_target().to_string(), "127.0.0.1:8080");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Interface to bind.
    pub host: IpAddr,
    /// TCP port to bind.
    pub port: u16,
}

impl ServerAddress {
    /// Creates an address from a host and a port.
    #[must_use]
    pub const fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// The endpoint to bind the listener to.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The endpoint a client on this machine should dial to reach the listener.
    ///
    /// A wildcard host is not a connectable destination on every platform, so
    /// it is swapped for the loopback address of the same family.
    #[must_use]
    pub fn dial_target(&self) -> SocketAddr {
        let host = match self.host {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            other => other,
        };
        SocketAddr::new(host, self.port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_wildcard_8080() {
        let address = ServerAddress::default();
        assert_eq!(address.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(address.port, 8080);
    }

    #[test]
    fn test_dial_target_replaces_ipv4_wildcard() {
        let address = ServerAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9000);
        assert_eq!(
            address.dial_target(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
        );
    }

    #[test]
    fn test_dial_target_replaces_ipv6_wildcard() {
        let address = ServerAddress::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 9000);
        assert_eq!(
            address.dial_target(),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 9000)
        );
    }

    #[test]
    fn test_dial_target_keeps_concrete_host() {
        let host: IpAddr = "192.0.2.7".parse().unwrap();
        let address = ServerAddress::new(host, 80);
        assert_eq!(address.dial_target(), SocketAddr::new(host, 80));
        assert_eq!(address.socket_addr(), address.dial_target());
    }

    #[test]
    fn test_display_ipv6() {
        let address = ServerAddress::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8080);
        assert_eq!(address.to_string(), "[::1]:8080");
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:43210".parse().unwrap();
        let address = ServerAddress::from(addr);
        assert_eq!(address.socket_addr(), addr);
    }
}
