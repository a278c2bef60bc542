//! The fixed 20-byte EIGRP header that precedes every packet's TLV stream.

use crate::error::{Error, Result};
use crate::wire::cursor::{Reader, Writer};

pub const HEADER_LEN: usize = 20;

/// INIT: first Update in a new adjacency's full-table exchange.
pub const FLAG_INIT: u32 = 0x0000_0001;
/// CR (conditional receive): only process if carrying the advertised
/// next-multicast sequence.
pub const FLAG_CR: u32 = 0x0000_0002;
/// RS: restart, set on Hellos sent during a graceful-restart window.
pub const FLAG_RS: u32 = 0x0000_0004;
/// EOT: end of table, last Update in an init exchange.
pub const FLAG_EOT: u32 = 0x0000_0008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Update,
    Request,
    Query,
    Reply,
    Hello,
    Probe,
    Ack,
    SiaQuery,
    SiaReply,
}

impl Opcode {
    fn from_wire(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Opcode::Update,
            2 => Opcode::Request,
            3 => Opcode::Query,
            4 => Opcode::Reply,
            5 => Opcode::Hello,
            7 => Opcode::Probe,
            8 => Opcode::Ack,
            10 => Opcode::SiaQuery,
            11 => Opcode::SiaReply,
            _ => return Err(Error::ErrCorrupt("unknown opcode")),
        })
    }

    fn to_wire(self) -> u8 {
        match self {
            Opcode::Update => 1,
            Opcode::Request => 2,
            Opcode::Query => 3,
            Opcode::Reply => 4,
            Opcode::Hello => 5,
            Opcode::Probe => 7,
            Opcode::Ack => 8,
            Opcode::SiaQuery => 10,
            Opcode::SiaReply => 11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode: Opcode,
    pub flags: u32,
    pub sequence: u32,
    pub ack: u32,
    pub virtual_router_id: u16,
    pub as_number: u16,
}

impl Header {
    pub const VERSION: u8 = 2;

    /// True for packets that carry nothing but an acknowledgement: a
    /// dedicated [`Opcode::Ack`], or (for routers that still piggyback
    /// acks on Hellos) a Hello with a nonzero ack field.
    pub fn is_ack(&self) -> bool {
        matches!(self.opcode, Opcode::Ack) || (matches!(self.opcode, Opcode::Hello) && self.ack != 0)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    pub(crate) fn decode(r: &mut Reader) -> Result<Self> {
        let version = r.u8()?;
        if version != Self::VERSION {
            return Err(Error::ErrCorrupt("unsupported header version"));
        }
        let opcode = Opcode::from_wire(r.u8()?)?;
        let _checksum = r.u16()?;
        let flags = r.u32()?;
        let sequence = r.u32()?;
        let ack = r.u32()?;
        let virtual_router_id = r.u16()?;
        let as_number = r.u16()?;
        Ok(Header { opcode, flags, sequence, ack, virtual_router_id, as_number })
    }

    /// Writes the header with a placeholder checksum, returning the byte
    /// offset of the checksum field so the caller can patch it once the
    /// full packet (header + TLVs) has been written.
    pub(crate) fn encode(&self, w: &mut Writer) -> usize {
        w.u8(Self::VERSION);
        w.u8(self.opcode.to_wire());
        let checksum_at = w.len();
        w.u16(0);
        w.u32(self.flags);
        w.u32(self.sequence);
        w.u32(self.ack);
        w.u16(self.virtual_router_id);
        w.u16(self.as_number);
        checksum_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let h = Header {
            opcode: Opcode::Hello,
            flags: FLAG_CR,
            sequence: 42,
            ack: 0,
            virtual_router_id: 0,
            as_number: 100,
        };
        let mut w = Writer::new();
        h.encode(&mut w);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), HEADER_LEN);

        let mut r = Reader::new(&bytes);
        let decoded = Header::decode(&mut r).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_unsupported_version() {
        let bytes = vec![9u8; HEADER_LEN];
        let mut r = Reader::new(&bytes);
        assert!(Header::decode(&mut r).is_err());
    }
}
