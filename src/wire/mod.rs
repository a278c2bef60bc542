pub mod checksum;
pub mod cursor;
pub mod header;
pub mod tlv;

use crate::error::{Error, Result};
use cursor::{Reader, Writer};
pub use header::{Header, Opcode, FLAG_CR, FLAG_EOT, FLAG_INIT, FLAG_RS};
pub use tlv::Tlv;

/// A fully decoded EIGRP packet: header plus its TLV stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub tlvs: Vec<Tlv>,
}

impl Packet {
    pub fn new(header: Header, tlvs: Vec<Tlv>) -> Self {
        Packet { header, tlvs }
    }

    /// Decodes a full on-wire packet, verifying the header checksum before
    /// touching any TLV.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < header::HEADER_LEN {
            return Err(Error::ErrShort { need: header::HEADER_LEN, have: buf.len() });
        }
        let got = u16::from_be_bytes([buf[2], buf[3]]);
        let computed = checksum_with_zeroed_field(buf);
        if got != computed {
            return Err(Error::ErrChecksum { got, computed });
        }

        let mut r = Reader::new(buf);
        let header = Header::decode(&mut r)?;
        let mut tlvs = Vec::new();
        while !r.is_empty() {
            tlvs.push(Tlv::decode(&mut r)?);
        }
        Ok(Packet { header, tlvs })
    }

    /// Encodes the packet, filling in the checksum over the finished byte
    /// stream.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        let checksum_at = self.header.encode(&mut w);
        for tlv in &self.tlvs {
            tlv.encode(&mut w);
        }
        let mut bytes = w.into_vec();
        let sum = checksum::compute(&bytes);
        bytes[checksum_at..checksum_at + 2].copy_from_slice(&sum.to_be_bytes());
        bytes
    }

    pub fn auth_tlv(&self) -> Option<&tlv::AuthTlv> {
        self.tlvs.iter().find_map(|t| match t {
            Tlv::Authentication(a) => Some(a),
            _ => None,
        })
    }
}

fn checksum_with_zeroed_field(buf: &[u8]) -> u16 {
    let mut copy = buf.to_vec();
    copy[2] = 0;
    copy[3] = 0;
    checksum::compute(&copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::KValues;
    use tlv::Parameter;

    #[test]
    fn packet_round_trip_with_valid_checksum() {
        let header = Header {
            opcode: Opcode::Hello,
            flags: 0,
            sequence: 0,
            ack: 0,
            virtual_router_id: 0,
            as_number: 1,
        };
        let tlvs = vec![Tlv::Parameter(Parameter {
            k: KValues::default(),
            hold_time: 15,
        })];
        let packet = Packet::new(header, tlvs);
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let header = Header {
            opcode: Opcode::Hello,
            flags: 0,
            sequence: 0,
            ack: 0,
            virtual_router_id: 0,
            as_number: 1,
        };
        let packet = Packet::new(header, vec![]);
        let mut bytes = packet.encode();
        bytes[10] ^= 0xff;
        assert!(Packet::decode(&bytes).is_err());
    }
}
