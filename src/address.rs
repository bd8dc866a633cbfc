//! Network addresses and the compact contact encoding.
//!
//! A remote is named by a host (DNS name, IPv4, or IPv6 address) and a
//! port. On the wire contacts travel in compact form: raw host bytes
//! followed by a big-endian port, 6 bytes for IPv4 and 18 for IPv6. Named
//! hosts have no compact form until a resolver maps them to an IP.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};

/// The host part of a [`NetworkAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// A DNS name, not yet resolved.
    Name(String),
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

/// Address family used to pick the matching routing table and pivot.
///
/// Named hosts count as IPv4 until resolution says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A remote endpoint: tagged host plus UDP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub host: Host,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn name(name: &str, port: u16) -> Self {
        Self::new(Host::Name(name.to_string()), port)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.host {
            Host::Name(_) => None,
            Host::V4(v4) => Some(IpAddr::V4(v4)),
            Host::V6(v6) => Some(IpAddr::V6(v6)),
        }
    }

    pub fn family(&self) -> Family {
        match self.host {
            Host::V6(_) => Family::V6,
            Host::Name(_) | Host::V4(_) => Family::V4,
        }
    }

    /// Compact contact bytes: host || big-endian port. Named hosts go
    /// through `resolver`; `None` when resolution fails.
    pub fn compact(&self, resolver: &dyn AddressResolver) -> Option<Bytes> {
        let ip = match &self.host {
            Host::Name(name) => resolver.resolve(name)?,
            Host::V4(v4) => IpAddr::V4(*v4),
            Host::V6(v6) => IpAddr::V6(*v6),
        };
        let mut buf = BytesMut::with_capacity(18);
        match ip {
            IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
            IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
        }
        buf.put_u16(self.port);
        Some(buf.freeze())
    }

    /// Parses a 6- or 18-byte compact contact. Other lengths yield `None`.
    pub fn from_compact(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            6 => {
                let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                let port = u16::from_be_bytes([bytes[4], bytes[5]]);
                Some(Self::new(Host::V4(ip), port))
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[..16]);
                let port = u16::from_be_bytes([bytes[16], bytes[17]]);
                Some(Self::new(Host::V6(Ipv6Addr::from(octets)), port))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for NetworkAddress {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(v4) => Host::V4(v4),
            IpAddr::V6(v6) => Host::V6(v6),
        };
        Self::new(host, addr.port())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Name(name) => write!(f, "{}:{}", name, self.port),
            Host::V4(v4) => write!(f, "{}:{}", v4, self.port),
            Host::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

/// Maps DNS names to IP addresses on behalf of the core.
///
/// The core never performs I/O itself; hosts plug in a resolver backed by
/// whatever lookup machinery they run.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<IpAddr>;
}

/// Resolver that resolves nothing. Named hosts simply never produce a
/// compact contact.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl AddressResolver for NullResolver {
    fn resolve(&self, _name: &str) -> Option<IpAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_v4_round_trip() {
        let addr = NetworkAddress::new(Host::V4(Ipv4Addr::new(192, 0, 2, 7)), 6881);
        let compact = addr.compact(&NullResolver).unwrap();
        assert_eq!(&compact[..], &[192, 0, 2, 7, 0x1a, 0xe1]);
        assert_eq!(NetworkAddress::from_compact(&compact), Some(addr));
    }

    #[test]
    fn compact_v6_round_trip() {
        let ip = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let addr = NetworkAddress::new(Host::V6(ip), 51413);
        let compact = addr.compact(&NullResolver).unwrap();
        assert_eq!(compact.len(), 18);
        assert_eq!(NetworkAddress::from_compact(&compact), Some(addr));
    }

    #[test]
    fn from_compact_rejects_odd_lengths() {
        assert_eq!(NetworkAddress::from_compact(&[1, 2, 3]), None);
        assert_eq!(NetworkAddress::from_compact(&[0; 7]), None);
        assert_eq!(NetworkAddress::from_compact(&[]), None);
    }

    #[test]
    fn names_need_a_resolver() {
        let addr = NetworkAddress::name("router.example.net", 6881);
        assert_eq!(addr.compact(&NullResolver), None);
        assert_eq!(addr.family(), Family::V4);

        struct Fixed;
        impl AddressResolver for Fixed {
            fn resolve(&self, _name: &str) -> Option<IpAddr> {
                Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)))
            }
        }
        let compact = addr.compact(&Fixed).unwrap();
        assert_eq!(&compact[..4], &[203, 0, 113, 1]);
    }

    #[test]
    fn family_follows_host() {
        let v6 = NetworkAddress::new(Host::V6(Ipv6Addr::LOCALHOST), 1);
        assert_eq!(v6.family(), Family::V6);
        let v4 = NetworkAddress::new(Host::V4(Ipv4Addr::LOCALHOST), 1);
        assert_eq!(v4.family(), Family::V4);
    }
}
