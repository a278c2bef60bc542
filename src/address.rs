//! IPv4 prefix and host address helpers.
//!
//! EIGRP classic TLVs pack prefixes with a variable-length address field (0-4
//! bytes) sized from the prefix length, rather than always shipping a full
//! 4-byte address. This module centers the arithmetic for that packing so
//! the wire codec doesn't have to.

use std::net::Ipv4Addr;

/// An IPv4 destination: address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    addr: Ipv4Addr,
    len: u8,
}

impl Prefix {
    /// Builds a prefix, masking any host bits beyond `len` to zero so two
    /// `Prefix` values with the same network compare equal regardless of
    /// how the caller phrased the host portion.
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        assert!(len <= 32, "prefix length out of range: {len}");
        let masked = u32::from(addr) & mask(len);
        Prefix { addr: Ipv4Addr::from(masked), len }
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_host(&self) -> bool {
        self.len == 32
    }

    /// Number of significant bytes needed to represent the network portion
    /// on the wire: 0 for a default route, up to 4 for anything over a /24.
    pub fn wire_byte_len(&self) -> usize {
        ((self.len as usize) + 7) / 8
    }

    /// Packs the significant bytes of the address, most-significant first.
    pub fn pack(&self) -> Vec<u8> {
        let octets = self.addr.octets();
        octets[..self.wire_byte_len()].to_vec()
    }

    /// Reconstructs a prefix from its packed significant bytes and length.
    pub fn unpack(len: u8, bytes: &[u8]) -> Self {
        let mut octets = [0u8; 4];
        octets[..bytes.len()].copy_from_slice(bytes);
        Prefix::new(Ipv4Addr::from(octets), len)
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

fn mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_byte_len_matches_prefix_length() {
        assert_eq!(Prefix::new(Ipv4Addr::new(10, 0, 0, 0), 8).wire_byte_len(), 1);
        assert_eq!(Prefix::new(Ipv4Addr::new(10, 1, 0, 0), 16).wire_byte_len(), 2);
        assert_eq!(Prefix::new(Ipv4Addr::new(10, 1, 2, 0), 24).wire_byte_len(), 3);
        assert_eq!(Prefix::new(Ipv4Addr::new(10, 1, 2, 3), 32).wire_byte_len(), 4);
        assert_eq!(Prefix::new(Ipv4Addr::new(0, 0, 0, 0), 0).wire_byte_len(), 0);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let p = Prefix::new(Ipv4Addr::new(192, 168, 12, 0), 22);
        let bytes = p.pack();
        assert_eq!(bytes.len(), 3);
        let back = Prefix::unpack(22, &bytes);
        assert_eq!(p, back);
    }

    #[test]
    fn host_bits_are_masked() {
        let p = Prefix::new(Ipv4Addr::new(10, 0, 0, 5), 24);
        assert_eq!(p.addr(), Ipv4Addr::new(10, 0, 0, 0));
    }
}
