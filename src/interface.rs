//! Interface configuration, neighbor membership and per-opcode
//! statistics.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::address::Prefix;
use crate::metric::VectorMetric;
use crate::neighbor::Neighbor;
use crate::transport::queue::MulticastQueue;
use crate::wire::Opcode;

/// Drives the hello/hold-time defaults (broadcast-style links are chatty
/// and quick to declare a neighbor dead; non-broadcast links are patient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Broadcast,
    PointToPoint,
    /// Non-broadcast multi-access or loopback-backed: slow hello cadence.
    NonBroadcast,
}

impl InterfaceType {
    pub fn default_hello(self) -> Duration {
        match self {
            InterfaceType::Broadcast | InterfaceType::PointToPoint => Duration::from_secs(5),
            InterfaceType::NonBroadcast => Duration::from_secs(60),
        }
    }

    pub fn default_hold(self) -> Duration {
        match self {
            InterfaceType::Broadcast | InterfaceType::PointToPoint => Duration::from_secs(15),
            InterfaceType::NonBroadcast => Duration::from_secs(180),
        }
    }
}

/// Per-opcode sent/received counters, exposed for an operational CLI's
/// interface dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpcodeCounters {
    pub hello: u64,
    pub update: u64,
    pub query: u64,
    pub reply: u64,
    pub sia_query: u64,
    pub sia_reply: u64,
    pub ack: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub sent: OpcodeCounters,
    pub received: OpcodeCounters,
}

impl InterfaceStats {
    pub fn record_sent(&mut self, opcode: Opcode, is_ack: bool) {
        Self::bump(&mut self.sent, opcode, is_ack);
    }

    pub fn record_received(&mut self, opcode: Opcode, is_ack: bool) {
        Self::bump(&mut self.received, opcode, is_ack);
    }

    fn bump(counters: &mut OpcodeCounters, opcode: Opcode, is_ack: bool) {
        if is_ack {
            counters.ack += 1;
            return;
        }
        match opcode {
            Opcode::Hello => counters.hello += 1,
            Opcode::Update | Opcode::Request => counters.update += 1,
            Opcode::Query => counters.query += 1,
            Opcode::Reply => counters.reply += 1,
            Opcode::SiaQuery => counters.sia_query += 1,
            Opcode::SiaReply => counters.sia_reply += 1,
            Opcode::Ack => counters.ack += 1,
            Opcode::Probe => {}
        }
    }
}

/// Tracks which TLV-format version each up neighbor on this interface is
/// running, per the Software Version TLV's `tlv_major` field. A mix of v1
/// and v2 neighbors on the same link means TLVs only the older format
/// understands must keep being sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionCounters {
    pub v1: u32,
    pub v2: u32,
}

impl VersionCounters {
    pub fn record(&mut self, tlv_major: u8) {
        if tlv_major >= 2 {
            self.v2 += 1;
        } else {
            self.v1 += 1;
        }
    }

    pub fn mixed(&self) -> bool {
        self.v1 > 0 && self.v2 > 0
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceParams {
    pub hello_interval: Duration,
    pub hold_time: Duration,
    pub bandwidth_kbps: u32,
    pub delay_us: u32,
    pub mtu: u32,
    pub split_horizon: bool,
}

impl InterfaceParams {
    pub fn for_type(kind: InterfaceType) -> Self {
        InterfaceParams {
            hello_interval: kind.default_hello(),
            hold_time: kind.default_hold(),
            bandwidth_kbps: 10_000,
            delay_us: 1000,
            mtu: 1500,
            split_horizon: true,
        }
    }

    pub fn link_metric(&self) -> VectorMetric {
        VectorMetric::from_link(self.bandwidth_kbps, self.delay_us, self.mtu)
    }
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceType,
    pub local_addr: Ipv4Addr,
    pub params: InterfaceParams,
    pub neighbors: HashMap<Ipv4Addr, Neighbor>,
    pub stats: InterfaceStats,
    pub version: VersionCounters,
    /// Held until every neighbor up at send time acks (see
    /// `transport::queue::MulticastQueue`).
    pub multicast_queue: MulticastQueue,
    /// The directly connected prefix this interface originates into the
    /// topology table, if any.
    pub connected: Option<Prefix>,
}

impl Interface {
    pub fn new(name: impl Into<String>, kind: InterfaceType, local_addr: Ipv4Addr) -> Self {
        Interface {
            name: name.into(),
            kind,
            local_addr,
            params: InterfaceParams::for_type(kind),
            neighbors: HashMap::new(),
            stats: InterfaceStats::default(),
            version: VersionCounters::default(),
            multicast_queue: MulticastQueue::new(),
            connected: None,
        }
    }

    pub fn neighbor_mut(&mut self, addr: Ipv4Addr) -> &mut Neighbor {
        self.neighbors
            .entry(addr)
            .or_insert_with(|| Neighbor::new(addr, self.name.clone(), self.params.hold_time))
    }

    pub fn up_neighbors(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values().filter(|n| n.is_up())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_defaults_are_fast() {
        let p = InterfaceParams::for_type(InterfaceType::Broadcast);
        assert_eq!(p.hello_interval, Duration::from_secs(5));
        assert_eq!(p.hold_time, Duration::from_secs(15));
    }

    #[test]
    fn non_broadcast_defaults_are_patient() {
        let p = InterfaceParams::for_type(InterfaceType::NonBroadcast);
        assert_eq!(p.hello_interval, Duration::from_secs(60));
        assert_eq!(p.hold_time, Duration::from_secs(180));
    }

    #[test]
    fn stats_count_acks_separately_from_hello() {
        let mut stats = InterfaceStats::default();
        stats.record_sent(Opcode::Hello, false);
        stats.record_sent(Opcode::Hello, true);
        assert_eq!(stats.sent.hello, 1);
        assert_eq!(stats.sent.ack, 1);
    }
}
