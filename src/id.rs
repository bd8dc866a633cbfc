//! 160-bit identifiers for nodes and content.
//!
//! Node IDs and info-hashes share the same keyspace: 20-byte big-endian
//! unsigned integers ordered numerically, with XOR as the Kademlia
//! distance metric. Midpoint and predecessor arithmetic back the routing
//! table's range splits.

use std::fmt;

use rand::Rng as _;

use crate::error::Error;

/// A 160-bit DHT node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 20]);

/// A 160-bit content fingerprint; shares the node-ID keyspace.
pub type InfoHash = NodeId;

impl NodeId {
    /// Zero, the lowest point of the keyspace.
    pub const MIN: NodeId = NodeId([0u8; 20]);

    /// `2^160 - 1`, the highest point of the keyspace.
    pub const MAX: NodeId = NodeId([0xff; 20]);

    /// A uniformly random ID.
    pub fn random() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 20 {
            return Err(Error::InvalidNodeId);
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to `other`. Distances order the keyspace around a
    /// target: smaller means closer.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// `lo + (hi - lo) / 2`, the split point of a bucket range.
    pub fn midpoint(lo: &NodeId, hi: &NodeId) -> NodeId {
        debug_assert!(lo <= hi);
        let gap = sub(&hi.0, &lo.0);
        NodeId(add(&lo.0, &shr1(&gap)))
    }

    /// `self - 1`. The caller must not pass zero.
    pub fn prev(&self) -> NodeId {
        debug_assert!(*self != NodeId::MIN);
        let mut one = [0u8; 20];
        one[19] = 1;
        NodeId(sub(&self.0, &one))
    }
}

/// XOR distance between two IDs; ordered as a 160-bit unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Distance(pub [u8; 20]);

fn add(a: &[u8; 20], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let mut carry = 0u16;
    for i in (0..20).rev() {
        let sum = a[i] as u16 + b[i] as u16 + carry;
        out[i] = sum as u8;
        carry = sum >> 8;
    }
    out
}

fn sub(a: &[u8; 20], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let mut borrow = 0i16;
    for i in (0..20).rev() {
        let diff = a[i] as i16 - b[i] as i16 - borrow;
        if diff < 0 {
            out[i] = (diff + 256) as u8;
            borrow = 1;
        } else {
            out[i] = diff as u8;
            borrow = 0;
        }
    }
    out
}

fn shr1(a: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let mut carry = 0u8;
    for i in 0..20 {
        out[i] = (carry << 7) | (a[i] >> 1);
        carry = a[i] & 1;
    }
    out
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..{:02x})", self.0[0], self.0[1], self.0[19])
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(bytes: &[u8]) -> NodeId {
        let mut out = [0u8; 20];
        out[..bytes.len()].copy_from_slice(bytes);
        NodeId(out)
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn from_bytes_requires_twenty() {
        assert!(NodeId::from_bytes(&[0u8; 20]).is_ok());
        assert!(NodeId::from_bytes(&[0u8; 19]).is_err());
        assert!(NodeId::from_bytes(&[0u8; 21]).is_err());
    }

    #[test]
    fn distance_is_xor() {
        let a = id(&[0b1100]);
        let b = id(&[0b1010]);
        assert_eq!(a.distance(&b).0[0], 0b0110);
        assert_eq!(a.distance(&a), Distance([0u8; 20]));
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn ordering_is_big_endian_numeric() {
        assert!(NodeId::MIN < NodeId::MAX);
        let low = id(&[0x00, 0xff]);
        let high = id(&[0x01, 0x00]);
        assert!(low < high);
    }

    #[test]
    fn midpoint_of_full_range() {
        let mid = NodeId::midpoint(&NodeId::MIN, &NodeId::MAX);
        let mut expected = [0xff; 20];
        expected[0] = 0x7f;
        assert_eq!(mid, NodeId(expected));
    }

    #[test]
    fn midpoint_of_narrow_range() {
        let lo = id(&[0x10]);
        let hi = id(&[0x20]);
        assert_eq!(NodeId::midpoint(&lo, &hi), id(&[0x18]));
        assert_eq!(NodeId::midpoint(&lo, &lo), lo);
    }

    #[test]
    fn prev_borrows_across_bytes() {
        let mut bytes = [0u8; 20];
        bytes[18] = 1;
        let x = NodeId(bytes);
        let mut expected = [0u8; 20];
        expected[19] = 0xff;
        assert_eq!(x.prev(), NodeId(expected));
        assert_eq!(NodeId::MAX.prev().0[19], 0xfe);
    }

    #[test]
    fn display_is_lower_hex() {
        assert_eq!(
            NodeId::MAX.to_string(),
            "ffffffffffffffffffffffffffffffffffffffff"
        );
    }
}
