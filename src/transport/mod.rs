pub mod queue;

use std::net::Ipv4Addr;

use crate::wire::{Header, Opcode, Packet};

/// How long to wait for an ack before retransmitting a reliable packet.
pub const RETRANS_TIME: std::time::Duration = std::time::Duration::from_secs(2);
/// Retransmission attempts before the neighbor is declared down.
pub const RETRANS_MAX: u8 = 16;

/// A packet in flight: either queued for unicast retransmission to one
/// neighbor, or held for multicast delivery pending acks from the whole
/// neighbor set on an interface.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub packet: Packet,
    pub attempts: u8,
}

impl OutboundPacket {
    pub fn new(packet: Packet) -> Self {
        OutboundPacket { packet, attempts: 0 }
    }

    pub fn is_reliable(&self) -> bool {
        !matches!(self.packet.header.opcode, Opcode::Hello | Opcode::Ack)
    }
}

/// Builds the plain ack: a dedicated Ack-opcode packet with no TLVs and the
/// ack field set to the sequence number being acknowledged.
pub fn build_ack(as_number: u16, vrid: u16, ack_seq: u32) -> Packet {
    let header = Header {
        opcode: Opcode::Ack,
        flags: 0,
        sequence: 0,
        ack: ack_seq,
        virtual_router_id: vrid,
        as_number,
    };
    Packet::new(header, vec![])
}

/// Source for outgoing packets: the instance hands the transport layer a
/// destination, reliable or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Unicast(Ipv4Addr),
    Multicast,
}
