//! BEP-42: node IDs constrained by the remote's IP address.
//!
//! A compliant node derives the first 21 bits of its ID from a masked
//! CRC32C of its external IP, which stops an attacker from claiming
//! arbitrary positions in the keyspace from a single address. Validation
//! recomputes the checksum from the observed source address.
//!
//! [BEP-42]: http://bittorrent.org/beps/bep_0042.html

use std::net::{IpAddr, Ipv4Addr};

use rand::Rng as _;

use crate::address::{Host, NetworkAddress};
use crate::id::NodeId;

const V4_MASK: [u8; 4] = [0x03, 0x0f, 0x3f, 0xff];
const V6_MASK: [u8; 8] = [0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f, 0xff];

/// Checks a node ID against the address it was observed from.
///
/// Named hosts never validate. IPv4 addresses in loopback, link-local,
/// and private ranges are accepted unconditionally; IPv6 has no exempt
/// ranges.
pub fn is_valid_node_id(address: &NetworkAddress, id: &NodeId) -> bool {
    let ip = match &address.host {
        Host::Name(_) => return false,
        Host::V4(v4) => {
            if is_unrestricted_v4(v4) {
                return true;
            }
            IpAddr::V4(*v4)
        }
        Host::V6(v6) => IpAddr::V6(*v6),
    };

    let r = id.0[19] & 0x07;
    let crc = address_checksum(ip, r);

    id.0[0] == (crc >> 24) as u8
        && id.0[1] == (crc >> 16) as u8
        && id.0[2] & 0xf8 == (crc >> 8) as u8 & 0xf8
}

/// Generates an ID valid for `address`, or `None` for a named host.
///
/// Unrestricted IPv4 addresses get a plain random ID; everything else
/// gets the checksum-constrained prefix, random middle bytes, and the
/// random nibble `r` in the final byte.
pub fn make_node_id(address: &NetworkAddress) -> Option<NodeId> {
    let ip = match &address.host {
        Host::Name(_) => return None,
        Host::V4(v4) => {
            if is_unrestricted_v4(v4) {
                return Some(NodeId::random());
            }
            IpAddr::V4(*v4)
        }
        Host::V6(v6) => IpAddr::V6(*v6),
    };

    let mut rng = rand::rng();
    let r = rng.random::<u8>() & 0x07;
    let crc = address_checksum(ip, r);

    let mut id = [0u8; 20];
    rng.fill(&mut id[3..19]);
    id[0] = (crc >> 24) as u8;
    id[1] = (crc >> 16) as u8;
    id[2] = ((crc >> 8) as u8 & 0xf8) | (rng.random::<u8>() & 0x07);
    id[19] = r;

    Some(NodeId(id))
}

fn address_checksum(ip: IpAddr, r: u8) -> u32 {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            let mut input = [0u8; 4];
            for (i, byte) in input.iter_mut().enumerate() {
                *byte = octets[i] & V4_MASK[i];
            }
            input[0] |= r << 5;
            crc32c::crc32c(&input)
        }
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut input = [0u8; 8];
            for (i, byte) in input.iter_mut().enumerate() {
                *byte = octets[i] & V6_MASK[i];
            }
            input[0] |= r << 5;
            crc32c::crc32c(&input)
        }
    }
}

/// Ranges where any node ID is accepted: loopback, link-local, and the
/// RFC 1918 private blocks.
fn is_unrestricted_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    match octets[0] {
        127 | 10 => true,
        169 => octets[1] == 254,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        _ => false,
    }
}
