//! # Endpoint Addresses
//!
//! An [`Address`] names one datagram endpoint: an IP address plus a port.
//! Peers are looked up by address, so it is a small `Copy` value compared
//! by value.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Host + port of a remote or local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(SocketAddr);

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Address(SocketAddr::new(ip, port))
    }

    /// Wildcard IPv4 address, for listening on every interface.
    pub fn any(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// Resolve a hostname (or IP literal) and take the first result.
    pub fn resolve(host: &str, port: u16) -> io::Result<Self> {
        (host, port)
            .to_socket_addrs()?
            .next()
            .map(Address)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {host}"),
                )
            })
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0.ip().is_unspecified()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address(addr)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_exposes_ip_and_port() {
        let addr = Address::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 9000);
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(addr.port(), 9000);
        assert_eq!(addr.to_string(), "10.0.0.7:9000");
    }

    #[test]
    fn any_is_unspecified() {
        let addr = Address::any(4000);
        assert!(addr.is_unspecified());
        assert_eq!(addr.port(), 4000);
        assert!(!Address::localhost(4000).is_unspecified());
    }

    #[test]
    fn compared_by_value() {
        let a: Address = "127.0.0.1:9000".parse().unwrap();
        let b = Address::localhost(9000);
        assert_eq!(a, b);
        assert_ne!(a, Address::localhost(9001));
    }

    #[test]
    fn resolve_ip_literal() {
        let addr = Address::resolve("127.0.0.1", 1234).unwrap();
        assert_eq!(addr, Address::localhost(1234));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not an address".parse::<Address>().is_err());
    }
}
