//! Per-neighbor retransmit queue and the interface-wide multicast hold
//! queue.
//!
//! Reliable unicast packets (Update/Query/Reply, and SIA variants) sit in
//! a neighbor's retransmit queue until acked or until `RETRANS_MAX`
//! attempts pass, at which point the neighbor session errors out.
//! Multicast packets are held on the interface until every neighbor that
//! was up when they were sent has acked, then they're retired together —
//! an unacked multicast packet degrades to a per-neighbor unicast
//! retransmission of just that packet to the laggards.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::transport::{OutboundPacket, RETRANS_MAX};
use std::net::Ipv4Addr;

#[derive(Debug, Default)]
pub struct RetransmitQueue {
    queue: VecDeque<OutboundPacket>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        RetransmitQueue { queue: VecDeque::new() }
    }

    pub fn push(&mut self, packet: OutboundPacket) {
        self.queue.push_back(packet);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<&OutboundPacket> {
        self.queue.front()
    }

    /// Acknowledges the packet at the front of the queue matching
    /// `ack_seq`, draining it. EIGRP acks are cumulative only in the sense
    /// that a neighbor acks the most recent sequence it has seen, so only
    /// the front entry (the oldest unacked packet) is ever checked.
    pub fn ack(&mut self, ack_seq: u32) -> bool {
        if let Some(front) = self.queue.front() {
            if front.packet.header.sequence == ack_seq {
                self.queue.pop_front();
                return true;
            }
        }
        false
    }

    /// Called on the `RETRANS_TIME` timer: bumps the attempt counter on
    /// the head-of-line packet, returning it for resend or an error if
    /// the neighbor has exhausted its retry budget.
    pub fn tick(&mut self, neighbor: Ipv4Addr) -> Result<Option<OutboundPacket>> {
        let Some(front) = self.queue.front_mut() else {
            return Ok(None);
        };
        front.attempts += 1;
        if front.attempts > RETRANS_MAX {
            return Err(Error::ErrRetransExhausted(neighbor, RETRANS_MAX));
        }
        Ok(Some(front.clone()))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Held per interface: multicast packets awaiting acks from every
/// neighbor up at send time.
#[derive(Debug, Default)]
pub struct MulticastQueue {
    queue: VecDeque<HeldMulticast>,
}

#[derive(Debug, Clone)]
pub struct HeldMulticast {
    pub packet: OutboundPacket,
    pub pending_acks: Vec<Ipv4Addr>,
}

impl MulticastQueue {
    pub fn new() -> Self {
        MulticastQueue { queue: VecDeque::new() }
    }

    pub fn push(&mut self, packet: OutboundPacket, neighbors: Vec<Ipv4Addr>) {
        self.queue.push_back(HeldMulticast { packet, pending_acks: neighbors });
    }

    /// Records an ack from `from`, retiring the held packet once every
    /// neighbor has acked it. Returns the neighbors still owed a unicast
    /// retransmission, if the retry timer fires before they all ack.
    pub fn ack(&mut self, from: Ipv4Addr, ack_seq: u32) {
        for held in &mut self.queue {
            if held.packet.packet.header.sequence == ack_seq {
                held.pending_acks.retain(|n| *n != from);
            }
        }
        self.queue.retain(|h| !h.pending_acks.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<&HeldMulticast> {
        self.queue.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut HeldMulticast> {
        self.queue.front_mut()
    }

    /// Every neighbor still owed an ack across any held packet: the
    /// suppression list carried in an outgoing Sequence TLV.
    pub fn behind_neighbors(&self) -> Vec<Ipv4Addr> {
        let mut out = Vec::new();
        for held in &self.queue {
            for n in &held.pending_acks {
                if !out.contains(n) {
                    out.push(*n);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Header, Opcode, Packet};

    fn packet_with_seq(seq: u32) -> OutboundPacket {
        let header = Header {
            opcode: Opcode::Update,
            flags: 0,
            sequence: seq,
            ack: 0,
            virtual_router_id: 0,
            as_number: 1,
        };
        OutboundPacket::new(Packet::new(header, vec![]))
    }

    #[test]
    fn ack_drains_matching_head_of_line() {
        let mut q = RetransmitQueue::new();
        q.push(packet_with_seq(5));
        assert!(!q.ack(6));
        assert_eq!(q.len(), 1);
        assert!(q.ack(5));
        assert!(q.is_empty());
    }

    #[test]
    fn tick_errors_after_max_attempts() {
        let mut q = RetransmitQueue::new();
        q.push(packet_with_seq(1));
        let neighbor = Ipv4Addr::new(10, 0, 0, 1);
        for _ in 0..RETRANS_MAX {
            assert!(q.tick(neighbor).unwrap().is_some());
        }
        assert!(q.tick(neighbor).is_err());
    }

    #[test]
    fn multicast_retires_once_all_neighbors_ack() {
        let mut q = MulticastQueue::new();
        let n1 = Ipv4Addr::new(10, 0, 0, 1);
        let n2 = Ipv4Addr::new(10, 0, 0, 2);
        q.push(packet_with_seq(9), vec![n1, n2]);
        q.ack(n1, 9);
        assert!(!q.is_empty());
        q.ack(n2, 9);
        assert!(q.is_empty());
    }
}
