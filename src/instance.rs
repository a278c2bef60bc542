//! The root object: owns every interface, the topology table, and the
//! scheduler that drives the whole single-threaded event loop.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::address::Prefix;
use crate::auth::Keychain;
use crate::config::InstanceConfig;
use crate::error::{Error, Result};
use crate::external::{Direction, FilterPredicate, RedistributionMetrics, RouteManager};
use crate::interface::Interface;
use crate::metric::{CompositeDistance, VectorMetric};
use crate::neighbor::{NeighborEvent, SessionState};
use crate::timer::Scheduler;
use crate::topology::route::RouteDescriptor;
use crate::topology::TopologyTable;
use crate::transport::{build_ack, Destination, OutboundPacket, RETRANS_TIME};
use crate::wire::header::{FLAG_CR, FLAG_EOT, FLAG_INIT, FLAG_RS};
use crate::wire::{Header, Opcode, Packet, Tlv};

/// How long to wait for an SIA-Reply before re-querying a stuck neighbor,
/// and how many unanswered firings to tolerate before forcing it down.
const SIA_TIME: Duration = Duration::from_secs(60);
const SIA_MAX_FIRES: u8 = 2;

/// Events the instance's scheduler fans timers out to. Every hold timer,
/// hello cadence, SIA timer and retransmit backoff in the daemon becomes
/// one of these rather than its own task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceTimerEvent {
    Hello { iface: String },
    Hold { iface: String, neighbor: Ipv4Addr },
    Retransmit { iface: String, neighbor: Ipv4Addr },
    /// Degrades an unacked held multicast packet to a per-neighbor unicast
    /// retransmission for whoever still hasn't acked it.
    MulticastRetransmit { iface: String },
    /// A diffusing computation for `prefix` has been outstanding too long:
    /// re-query the stragglers, or force them down on the second firing.
    Sia { prefix: Prefix },
}

/// A packet the instance wants sent, queued for the caller's transport to
/// actually put on the wire. Keeping `Instance` free of any socket lets it
/// be driven by tests without a real network.
pub struct PendingSend {
    pub iface: String,
    pub dest: Destination,
    pub packet: Packet,
}

pub struct Instance {
    pub config: InstanceConfig,
    pub interfaces: HashMap<String, Interface>,
    pub topology: TopologyTable,
    pub scheduler: Scheduler<InstanceTimerEvent>,
    pub redistribution: RedistributionMetrics,
    sequence: u32,
    route_manager: Box<dyn RouteManager>,
    keychain: Box<dyn Keychain>,
    filter: Box<dyn FilterPredicate>,
    outbound: Vec<PendingSend>,
}

impl Instance {
    pub fn new(
        config: InstanceConfig,
        route_manager: Box<dyn RouteManager>,
        keychain: Box<dyn Keychain>,
        filter: Box<dyn FilterPredicate>,
    ) -> Result<Self> {
        let config = config.validated()?;
        Ok(Instance {
            config,
            interfaces: HashMap::new(),
            topology: TopologyTable::new(),
            scheduler: Scheduler::new(),
            redistribution: RedistributionMetrics::new(),
            sequence: 0,
            route_manager,
            keychain,
            filter,
            outbound: Vec::new(),
        })
    }

    pub fn add_interface(&mut self, iface: Interface) {
        let name = iface.name.clone();
        let has_connected = iface.connected.is_some();
        self.scheduler.schedule(iface.params.hello_interval, InstanceTimerEvent::Hello { iface: name.clone() });
        self.interfaces.insert(name.clone(), iface);
        if has_connected {
            self.originate_connected(&name);
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Drains packets queued for transmission since the last call — the
    /// event loop's write side, fed to whatever owns the real socket.
    pub fn take_outbound(&mut self) -> Vec<PendingSend> {
        std::mem::take(&mut self.outbound)
    }

    fn queue_send(&mut self, iface: &str, dest: Destination, packet: Packet) {
        self.outbound.push(PendingSend { iface: iface.to_string(), dest, packet });
    }

    /// Processes one received, already-decoded packet from `from` on
    /// `iface_name`. `raw` is the original wire bytes, needed to verify
    /// the authentication digest.
    pub fn receive(&mut self, iface_name: &str, from: Ipv4Addr, packet: Packet, raw: &[u8]) -> Result<()> {
        if let Some(auth) = packet.auth_tlv() {
            crate::auth::verify(&packet, raw, self.keychain.as_ref(), iface_name, from)?;
            let key_sequence = auth.key_sequence;
            let iface = self
                .interfaces
                .get_mut(iface_name)
                .ok_or(Error::ErrCorrupt("packet received on unknown interface"))?;
            if !iface.neighbor_mut(from).accept_crypt_seqnum(key_sequence) {
                return Err(Error::ErrAuth(from));
            }
        }

        let local_addr = self
            .interfaces
            .get(iface_name)
            .ok_or(Error::ErrCorrupt("packet received on unknown interface"))?
            .local_addr;

        // Conditional receive: a neighbor named in the Sequence TLV is
        // still behind on an earlier multicast and must wait for its own
        // unicast catch-up copy rather than processing this one.
        if packet.header.has_flag(FLAG_CR) {
            let suppressed = packet
                .tlvs
                .iter()
                .any(|t| matches!(t, Tlv::Sequence(addrs) if addrs.contains(&local_addr)));
            if suppressed {
                if let Some(next) = packet.tlvs.iter().find_map(|t| match t {
                    Tlv::NextMulticastSequence(s) => Some(*s),
                    _ => None,
                }) {
                    let iface = self.interfaces.get_mut(iface_name).unwrap();
                    iface.neighbor_mut(from).expected_multicast_seq = Some(next);
                }
                return Ok(());
            }
        }

        // Ack processing happens for any packet carrying one, not only
        // dedicated Ack packets: Pending -> Up fires here, the moment our
        // own INIT update is acked, not on the peer's EOT.
        if packet.header.ack != 0 {
            let fires_init_ack = {
                let iface = self
                    .interfaces
                    .get_mut(iface_name)
                    .ok_or(Error::ErrCorrupt("packet received on unknown interface"))?;
                let nbr = iface.neighbor_mut(from);
                nbr.retransmit_queue.ack(packet.header.ack);
                let fires =
                    nbr.state == SessionState::Pending && nbr.init_sequence_number == Some(packet.header.ack);
                iface.multicast_queue.ack(from, packet.header.ack);
                fires
            };
            if fires_init_ack {
                let iface = self.interfaces.get_mut(iface_name).unwrap();
                iface.neighbor_mut(from).apply(NeighborEvent::InitAckReceived);
                self.send_eot_update(iface_name, from)?;
            }
        }

        if packet.header.is_ack() {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.stats.record_received(Opcode::Ack, true);
            return Ok(());
        }

        {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.stats.record_received(packet.header.opcode, false);
        }

        match packet.header.opcode {
            Opcode::Hello => self.handle_hello(iface_name, from, &packet),
            Opcode::Update => self.handle_update(iface_name, from, &packet),
            Opcode::Query => self.handle_query(iface_name, from, &packet),
            Opcode::SiaQuery => self.handle_sia_query(iface_name, from, &packet),
            Opcode::Reply => self.handle_reply(iface_name, from, &packet),
            Opcode::SiaReply => self.handle_sia_reply(iface_name, from, &packet),
            Opcode::Request | Opcode::Probe | Opcode::Ack => Ok(()),
        }
    }

    fn handle_hello(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        let local_addr = self.interfaces.get(iface_name).map(|i| i.local_addr);
        for tlv in &packet.tlvs {
            if let Tlv::PeerTermination(addr) = tlv {
                if Some(*addr) == local_addr {
                    let iface = self.interfaces.get_mut(iface_name).unwrap();
                    iface.neighbor_mut(from).apply(NeighborEvent::PeerTerminated);
                    return Err(Error::ErrPeerTerm(from));
                }
            }
        }

        let iface = self.interfaces.get_mut(iface_name).unwrap();
        let hold_time = iface.params.hold_time;
        let nbr = iface.neighbor_mut(from);

        if let Some(Tlv::Parameter(p)) = packet.tlvs.iter().find(|t| matches!(t, Tlv::Parameter(_))) {
            if let Some(existing) = nbr.k_values {
                if existing != p.k {
                    nbr.apply(NeighborEvent::KValueMismatch);
                    return Err(Error::ErrKMismatch(from));
                }
            }
            nbr.k_values = Some(p.k);
            nbr.hold_time = Duration::from_secs(u64::from(p.hold_time));
        }

        let was_down = nbr.state == SessionState::Down;
        nbr.apply(NeighborEvent::HelloReceived);
        let old_token = nbr.hold_timer.take();
        if let Some(token) = old_token {
            self.scheduler.cancel(token);
        }
        let new_token = self.scheduler.schedule(
            hold_time,
            InstanceTimerEvent::Hold { iface: iface_name.to_string(), neighbor: from },
        );
        let iface = self.interfaces.get_mut(iface_name).unwrap();
        let nbr = iface.neighbor_mut(from);
        nbr.hold_timer = Some(new_token);

        if let Some(sv) = packet.tlvs.iter().find_map(|t| match t {
            Tlv::SoftwareVersion(v) => Some(*v),
            _ => None,
        }) {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.neighbor_mut(from).software_version = Some(sv);
            iface.version.record(sv.tlv_major);
        }

        if was_down {
            self.send_init_update(iface_name, from)?;
        }
        Ok(())
    }

    /// Sends the INIT-flagged Update that opens the init exchange. Carries
    /// no topology yet; the peer's ack of this exact sequence is what
    /// moves the session Pending -> Up, at which point the full table
    /// (the EOT Update) goes out.
    fn send_init_update(&mut self, iface_name: &str, to: Ipv4Addr) -> Result<()> {
        let seq = self.next_sequence();
        let header = Header {
            opcode: Opcode::Update,
            flags: FLAG_INIT,
            sequence: seq,
            ack: 0,
            virtual_router_id: 0,
            as_number: self.config.as_number,
        };
        let packet = Packet::new(header, vec![]);
        let iface = self.interfaces.get_mut(iface_name).unwrap();
        iface.stats.record_sent(Opcode::Update, false);
        let nbr = iface.neighbor_mut(to);
        nbr.init_sequence_number = Some(seq);
        nbr.retransmit_queue.push(OutboundPacket::new(packet.clone()));
        self.scheduler.schedule(RETRANS_TIME, InstanceTimerEvent::Retransmit { iface: iface_name.to_string(), neighbor: to });
        self.queue_send(iface_name, Destination::Unicast(to), packet);
        Ok(())
    }

    /// Sends the full topology table as the EOT-flagged closing Update of
    /// an init exchange, once our own INIT has been acked.
    fn send_eot_update(&mut self, iface_name: &str, to: Ipv4Addr) -> Result<()> {
        let tlvs: Vec<Tlv> = self
            .topology
            .iter()
            .filter(|pd| pd.is_reachable())
            .filter_map(|pd| self.internal_tlv_for(iface_name, pd.prefix, false))
            .collect();
        self.send_reliable_unicast(iface_name, to, Opcode::Update, FLAG_EOT, tlvs);
        Ok(())
    }

    fn handle_update(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        if packet.header.has_flag(FLAG_INIT | FLAG_RS) {
            self.start_graceful_restart(iface_name, from);
        }

        let link_metric = {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.params.link_metric()
        };
        let k = self.config.k_values;

        for tlv in &packet.tlvs {
            let Tlv::Ipv4Internal(entry) = tlv else { continue };
            if !self.filter.permits(iface_name, Direction::Inbound, &entry.prefix) {
                continue;
            }
            let prefix = entry.prefix;
            self.clear_gr_expected(iface_name, from, prefix);

            let reported = entry.metric.composite_distance(&k);
            let distance = entry.metric.compose(&link_metric).composite_distance(&k);
            let route = RouteDescriptor::new(from, reported, distance, entry.metric);

            let was_reachable;
            let is_active;
            {
                let pd = self.topology.entry(prefix);
                was_reachable = pd.is_reachable();
                pd.upsert_route(route);
                is_active = pd.fsm.is_active();
                if !is_active {
                    if let Some(new_fd) = pd.recompute_successors(self.config.variance, self.config.max_paths) {
                        pd.feasible_distance = new_fd;
                    }
                }
            }

            let reachable = self.topology.entry(prefix).is_reachable();
            if was_reachable != reachable {
                self.topology.record_change(prefix, reachable);
            }
            self.reinstall(prefix);

            if is_active {
                continue;
            }
            if was_reachable && !reachable {
                self.begin_active(prefix);
            } else if reachable {
                self.advertise_update_all(prefix);
            }
        }

        if packet.header.has_flag(FLAG_EOT) {
            self.finish_graceful_restart(iface_name, from);
        }

        self.ack(iface_name, from, packet.header.sequence)
    }

    fn handle_query(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(entry) = tlv {
                self.process_query(iface_name, from, entry.prefix);
            }
        }
        self.ack(iface_name, from, packet.header.sequence)
    }

    /// An SIA-Query is answered exactly like a plain Query on the passive
    /// side (immediate Reply, or go active and queue the asker); the
    /// distinction that matters is purely on the reply path, where a
    /// straggling neighbor sends SIA-Reply instead of Reply.
    fn handle_sia_query(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(entry) = tlv {
                self.process_query(iface_name, from, entry.prefix);
            }
        }
        self.ack(iface_name, from, packet.header.sequence)
    }

    fn process_query(&mut self, iface_name: &str, from: Ipv4Addr, prefix: Prefix) {
        let is_active = self.topology.entry(prefix).fsm.is_active();

        if is_active {
            let pd = self.topology.entry(prefix);
            if !pd.pending_repliers.contains(&from) {
                pd.pending_repliers.push(from);
            }
            return;
        }

        if self.topology.entry(prefix).is_reachable() {
            self.send_reply(iface_name, from, prefix);
            return;
        }

        self.topology.entry(prefix).pending_repliers.push(from);
        self.begin_active(prefix);
    }

    fn handle_reply(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(entry) = tlv {
                let prefix = entry.prefix;
                let complete = self.topology.entry(prefix).fsm.receive_reply(from);
                if complete {
                    self.settle_active(prefix);
                }
            }
        }
        self.ack(iface_name, from, packet.header.sequence)
    }

    /// An SIA-Reply only proves the neighbor is still working the query:
    /// it resets the SIA fire count but, unlike a plain Reply, never
    /// removes the neighbor from the outstanding set or completes the
    /// computation.
    fn handle_sia_reply(&mut self, iface_name: &str, from: Ipv4Addr, packet: &Packet) -> Result<()> {
        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(entry) = tlv {
                self.topology.entry(entry.prefix).fsm.receive_sia_reply(from);
            }
        }
        self.ack(iface_name, from, packet.header.sequence)
    }

    /// Fires when all outstanding replies for an active computation are
    /// in: settles back Passive (or immediately restarts with a queued
    /// change), replies to anyone who queried us meanwhile, and
    /// re-advertises the new distance if it changed.
    fn settle_active(&mut self, prefix: Prefix) {
        let variance = self.config.variance;
        let max_paths = self.config.max_paths;
        let all_neighbors: Vec<Ipv4Addr> = self.all_up_neighbors().into_iter().map(|(_, a)| a).collect();

        let (repliers, still_active) = {
            let pd = self.topology.entry(prefix);
            pd.fsm.finish(|| all_neighbors.clone());
            let still_active = pd.fsm.is_active();
            if !still_active {
                if let Some(new_fd) = pd.recompute_successors(variance, max_paths) {
                    pd.feasible_distance = new_fd;
                }
            }
            let repliers = if still_active { Vec::new() } else { std::mem::take(&mut pd.pending_repliers) };
            (repliers, still_active)
        };

        self.reinstall(prefix);

        if still_active {
            let neighbor_pairs = self.all_up_neighbors();
            self.multicast_query_for(prefix, &neighbor_pairs);
            self.scheduler.schedule(SIA_TIME, InstanceTimerEvent::Sia { prefix });
            return;
        }

        for to in repliers {
            self.send_reply_to(to, prefix);
        }
        self.advertise_update_all(prefix);
    }

    /// All feasible successors were lost (locally, or because the last
    /// one just timed out under SIA): go active, querying every up
    /// neighbor on every interface.
    fn begin_active(&mut self, prefix: Prefix) {
        let neighbors = self.all_up_neighbors();
        let addrs: Vec<Ipv4Addr> = neighbors.iter().map(|(_, a)| *a).collect();
        {
            let pd = self.topology.entry(prefix);
            pd.fsm.go_active(addrs, false);
        }
        if neighbors.is_empty() {
            self.settle_active(prefix);
        } else {
            self.multicast_query_for(prefix, &neighbors);
            self.scheduler.schedule(SIA_TIME, InstanceTimerEvent::Sia { prefix });
        }
    }

    fn handle_sia_timer(&mut self, prefix: Prefix) {
        let is_active = self.topology.get(&prefix).is_some_and(|pd| pd.fsm.is_active());
        if !is_active {
            return;
        }

        let (outstanding, fire_count) = self.topology.entry(prefix).fsm.sia_timer_fire();
        if outstanding.is_empty() {
            self.settle_active(prefix);
            return;
        }

        if fire_count < SIA_MAX_FIRES {
            for addr in &outstanding {
                if let Some(iface_name) = self.iface_of_neighbor(*addr).map(str::to_string) {
                    self.send_sia_query(&iface_name, *addr, prefix);
                }
            }
            self.scheduler.schedule(SIA_TIME, InstanceTimerEvent::Sia { prefix });
            return;
        }

        for addr in outstanding {
            let iface_name = match self.iface_of_neighbor(addr) {
                Some(n) => n.to_string(),
                None => continue,
            };
            {
                if let Some(iface) = self.interfaces.get_mut(&iface_name) {
                    iface.neighbor_mut(addr).apply(NeighborEvent::SiaTimeout);
                }
            }
            let route = RouteDescriptor::new(addr, CompositeDistance::INFINITY, CompositeDistance::INFINITY, VectorMetric::unreachable());
            let pd = self.topology.entry(prefix);
            pd.upsert_route(route);
            pd.fsm.receive_reply(addr);
        }

        if self.topology.entry(prefix).fsm.is_complete() {
            self.settle_active(prefix);
        } else {
            self.scheduler.schedule(SIA_TIME, InstanceTimerEvent::Sia { prefix });
        }
    }

    fn send_sia_query(&mut self, iface_name: &str, to: Ipv4Addr, prefix: Prefix) {
        let tlv = self.reply_tlv_for(prefix);
        self.send_reliable_unicast(iface_name, to, Opcode::SiaQuery, 0, vec![tlv]);
    }

    fn send_reply(&mut self, iface_name: &str, to: Ipv4Addr, prefix: Prefix) {
        let tlv = self.reply_tlv_for(prefix);
        self.send_reliable_unicast(iface_name, to, Opcode::Reply, 0, vec![tlv]);
    }

    fn send_reply_to(&mut self, to: Ipv4Addr, prefix: Prefix) {
        let Some(iface_name) = self.iface_of_neighbor(to).map(str::to_string) else { return };
        let tlv = self.reply_tlv_for(prefix);
        self.send_reliable_unicast(&iface_name, to, Opcode::Reply, 0, vec![tlv]);
    }

    /// Groups `neighbor_pairs` by interface and multicasts one reliable
    /// Query per interface that has any of them up.
    fn multicast_query_for(&mut self, prefix: Prefix, neighbor_pairs: &[(String, Ipv4Addr)]) {
        let mut ifaces: Vec<String> = neighbor_pairs.iter().map(|(i, _)| i.clone()).collect();
        ifaces.sort();
        ifaces.dedup();
        for iface_name in ifaces {
            let tlv = self.reply_tlv_for(prefix);
            self.send_reliable_multicast(&iface_name, Opcode::Query, 0, vec![tlv]);
        }
    }

    /// Re-advertises `prefix`'s current distance to every interface with
    /// an up neighbor, honoring split horizon per interface.
    fn advertise_update_all(&mut self, prefix: Prefix) {
        let iface_names: Vec<String> = self.interfaces.keys().cloned().collect();
        for iface_name in iface_names {
            let has_up = self.interfaces.get(&iface_name).is_some_and(|i| i.up_neighbors().next().is_some());
            if !has_up {
                continue;
            }
            if let Some(tlv) = self.internal_tlv_for(&iface_name, prefix, false) {
                self.send_reliable_multicast(&iface_name, Opcode::Update, 0, vec![tlv]);
            }
        }
    }

    fn ack(&mut self, iface_name: &str, to: Ipv4Addr, seq: u32) -> Result<()> {
        let iface = self.interfaces.get_mut(iface_name).ok_or(Error::ErrCorrupt("unknown interface"))?;
        iface.stats.record_sent(Opcode::Ack, true);
        let ack_packet = build_ack(self.config.as_number, 0, seq);
        self.queue_send(iface_name, Destination::Unicast(to), ack_packet);
        Ok(())
    }

    /// A reliable packet to one neighbor: registered in its retransmit
    /// queue and resent on `RETRANS_TIME` until acked or exhausted.
    fn send_reliable_unicast(&mut self, iface_name: &str, to: Ipv4Addr, opcode: Opcode, flags: u32, tlvs: Vec<Tlv>) -> u32 {
        let seq = self.next_sequence();
        let header = Header { opcode, flags, sequence: seq, ack: 0, virtual_router_id: 0, as_number: self.config.as_number };
        let packet = Packet::new(header, tlvs);
        {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.stats.record_sent(opcode, false);
            iface.neighbor_mut(to).retransmit_queue.push(OutboundPacket::new(packet.clone()));
        }
        self.scheduler.schedule(RETRANS_TIME, InstanceTimerEvent::Retransmit { iface: iface_name.to_string(), neighbor: to });
        self.queue_send(iface_name, Destination::Unicast(to), packet);
        seq
    }

    /// A reliable packet multicast to every up neighbor on `iface_name`,
    /// held in the interface's [`crate::transport::queue::MulticastQueue`]
    /// until every one of them has acked. If any neighbor is still behind
    /// on an earlier held packet, this one carries a Sequence TLV naming
    /// them (conditional receive) plus the NextMulticastSequence they
    /// should actually wait for.
    fn send_reliable_multicast(&mut self, iface_name: &str, opcode: Opcode, flags: u32, mut tlvs: Vec<Tlv>) {
        let seq = self.next_sequence();

        let behind = {
            let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
            iface.multicast_queue.behind_neighbors()
        };
        if !behind.is_empty() {
            tlvs.push(Tlv::Sequence(behind.clone()));
            tlvs.push(Tlv::NextMulticastSequence(seq));
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            for addr in &behind {
                iface.neighbor_mut(*addr).expected_multicast_seq = Some(seq);
            }
        }
        let effective_flags = if behind.is_empty() { flags } else { flags | FLAG_CR };

        let header = Header { opcode, flags: effective_flags, sequence: seq, ack: 0, virtual_router_id: 0, as_number: self.config.as_number };
        let packet = Packet::new(header, tlvs);

        let up: Vec<Ipv4Addr> = {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.stats.record_sent(opcode, false);
            iface.up_neighbors().map(|n| n.address).collect()
        };

        if !up.is_empty() {
            let iface = self.interfaces.get_mut(iface_name).unwrap();
            iface.multicast_queue.push(OutboundPacket::new(packet.clone()), up);
            self.scheduler.schedule(RETRANS_TIME, InstanceTimerEvent::MulticastRetransmit { iface: iface_name.to_string() });
        }

        self.queue_send(iface_name, Destination::Multicast, packet);
    }

    /// Builds the Ipv4Internal TLV this router would advertise for
    /// `prefix` out `iface_name`: our own vector through the current
    /// successor, suppressed by split horizon unless `force_infinite`
    /// (poisoned reverse) or the route is the self-originated connected
    /// one.
    fn internal_tlv_for(&self, iface_name: &str, prefix: Prefix, force_infinite: bool) -> Option<Tlv> {
        let iface = self.interfaces.get(iface_name)?;
        let metric = if force_infinite {
            VectorMetric::unreachable()
        } else {
            let pd = self.topology.get(&prefix)?;
            let best = pd.successors().next()?;
            if iface.params.split_horizon && !best.is_connected() && iface.neighbors.contains_key(&best.via_neighbor) {
                return None;
            }
            self.own_vector_for(prefix)?
        };
        Some(Tlv::Ipv4Internal(crate::wire::tlv::InternalEntry { next_hop: Ipv4Addr::UNSPECIFIED, metric, prefix }))
    }

    /// The TLV used to answer a Query/SIA-Query or settle an active
    /// computation: unlike [`Self::internal_tlv_for`] this never applies
    /// split horizon, since it answers a specific asker rather than
    /// broadcasting to a whole segment.
    fn reply_tlv_for(&self, prefix: Prefix) -> Tlv {
        let reachable = self.topology.get(&prefix).is_some_and(|pd| pd.is_reachable());
        let metric = if reachable {
            self.own_vector_for(prefix).unwrap_or_else(VectorMetric::unreachable)
        } else {
            VectorMetric::unreachable()
        };
        Tlv::Ipv4Internal(crate::wire::tlv::InternalEntry { next_hop: Ipv4Addr::UNSPECIFIED, metric, prefix })
    }

    /// This router's own vector to `prefix`: the connected metric
    /// directly, or the successor's advertised vector composed with the
    /// link to reach it.
    fn own_vector_for(&self, prefix: Prefix) -> Option<VectorMetric> {
        let pd = self.topology.get(&prefix)?;
        let best = pd.successors().next()?;
        if best.is_connected() {
            return Some(best.metric);
        }
        let iface_name = self.iface_of_neighbor(best.via_neighbor)?;
        let link_metric = self.interfaces.get(iface_name)?.params.link_metric();
        Some(best.metric.compose(&link_metric))
    }

    fn iface_of_neighbor(&self, addr: Ipv4Addr) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|(_, iface)| iface.neighbors.contains_key(&addr))
            .map(|(name, _)| name.as_str())
    }

    fn all_up_neighbors(&self) -> Vec<(String, Ipv4Addr)> {
        self.interfaces
            .iter()
            .flat_map(|(name, iface)| iface.up_neighbors().map(move |n| (name.clone(), n.address)))
            .collect()
    }

    /// Originates this interface's directly connected prefix into the
    /// topology table as a self-originated route (`via_neighbor` set to
    /// the unspecified address), so it gets advertised like any other
    /// successor without ever being pushed back through `RouteManager`.
    fn originate_connected(&mut self, iface_name: &str) {
        let Some(iface) = self.interfaces.get(iface_name) else { return };
        let Some(prefix) = iface.connected else { return };
        let metric = iface.params.link_metric();
        let distance = metric.composite_distance(&self.config.k_values);

        let pd = self.topology.entry(prefix);
        pd.upsert_route(RouteDescriptor::connected(distance, metric));
        if let Some(new_fd) = pd.recompute_successors(self.config.variance, self.config.max_paths) {
            pd.feasible_distance = new_fd;
        }
        let reachable = self.topology.entry(prefix).is_reachable();
        self.topology.record_change(prefix, reachable);
        self.reinstall(prefix);
    }

    fn clear_gr_expected(&mut self, iface_name: &str, from: Ipv4Addr, prefix: Prefix) {
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        if let Some(expected) = &mut iface.neighbor_mut(from).gr_expected {
            expected.remove(&prefix);
        }
    }

    /// An `INIT|RS` Update opens a graceful-restart sequence: snapshot the
    /// prefixes this neighbor currently contributes a route for. Each
    /// subsequent Update (processed by the caller) removes matching
    /// prefixes from the snapshot as the neighbor re-advertises them.
    fn start_graceful_restart(&mut self, iface_name: &str, from: Ipv4Addr) {
        let snapshot: HashSet<Prefix> = self
            .topology
            .iter()
            .filter(|pd| pd.routes.iter().any(|r| r.via_neighbor == from))
            .map(|pd| pd.prefix)
            .collect();
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        iface.neighbor_mut(from).gr_expected = Some(snapshot);
    }

    /// At EOT, whatever prefixes remain in the snapshot were silently
    /// dropped by the restarting neighbor: withdraw them.
    fn finish_graceful_restart(&mut self, iface_name: &str, from: Ipv4Addr) {
        let remaining: Vec<Prefix> = {
            let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
            match iface.neighbor_mut(from).gr_expected.take() {
                Some(set) => set.into_iter().collect(),
                None => return,
            }
        };

        for prefix in remaining {
            let was_reachable;
            let is_active;
            {
                let pd = self.topology.entry(prefix);
                was_reachable = pd.is_reachable();
                pd.remove_route(from);
                is_active = pd.fsm.is_active();
                if !is_active {
                    if let Some(new_fd) = pd.recompute_successors(self.config.variance, self.config.max_paths) {
                        pd.feasible_distance = new_fd;
                    }
                }
            }
            let reachable = self.topology.entry(prefix).is_reachable();
            if was_reachable != reachable {
                self.topology.record_change(prefix, reachable);
            }
            self.reinstall(prefix);

            if !is_active && was_reachable && !reachable {
                self.begin_active(prefix);
            }
        }
    }

    fn reinstall(&mut self, prefix: Prefix) {
        let Some(pd) = self.topology.get(&prefix) else { return };
        if !pd.is_reachable() {
            self.route_manager.withdraw(prefix);
            return;
        }
        let next_hops: Vec<Ipv4Addr> = pd.successors().filter(|r| !r.is_connected()).map(|r| r.via_neighbor).collect();
        if !next_hops.is_empty() {
            self.route_manager.install(prefix, &next_hops);
        }
        // A prefix reachable only via the self-originated connected route
        // is already attached to the interface; there's nothing to push.
    }

    /// Drains due timers and acts on them: this is the single point where
    /// the event loop touches time.
    pub fn run_due_timers(&mut self) {
        for event in self.scheduler.poll() {
            match event {
                InstanceTimerEvent::Hello { iface } => self.send_hello(&iface),
                InstanceTimerEvent::Hold { iface, neighbor } => self.expire_hold(&iface, neighbor),
                InstanceTimerEvent::Retransmit { iface, neighbor } => self.retransmit(&iface, neighbor),
                InstanceTimerEvent::MulticastRetransmit { iface } => self.retransmit_multicast(&iface),
                InstanceTimerEvent::Sia { prefix } => self.handle_sia_timer(prefix),
            }
        }
    }

    fn send_hello(&mut self, iface_name: &str) {
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        iface.stats.record_sent(Opcode::Hello, false);
        let interval = iface.params.hello_interval;
        let hold_time = iface.params.hold_time.as_secs().min(u64::from(u16::MAX)) as u16;
        let header = Header {
            opcode: Opcode::Hello,
            flags: 0,
            sequence: 0,
            ack: 0,
            virtual_router_id: 0,
            as_number: self.config.as_number,
        };
        let tlvs = vec![Tlv::Parameter(crate::wire::tlv::Parameter { k: self.config.k_values, hold_time })];
        self.queue_send(iface_name, Destination::Multicast, Packet::new(header, tlvs));
        self.scheduler.schedule(interval, InstanceTimerEvent::Hello { iface: iface_name.to_string() });
    }

    fn expire_hold(&mut self, iface_name: &str, neighbor: Ipv4Addr) {
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        let nbr = iface.neighbor_mut(neighbor);
        nbr.apply(NeighborEvent::HoldExpired);
    }

    fn retransmit(&mut self, iface_name: &str, neighbor: Ipv4Addr) {
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        let nbr = iface.neighbor_mut(neighbor);
        match nbr.retransmit_queue.tick(neighbor) {
            Ok(Some(outbound)) => {
                self.queue_send(iface_name, Destination::Unicast(neighbor), outbound.packet);
                self.scheduler.schedule(
                    RETRANS_TIME,
                    InstanceTimerEvent::Retransmit { iface: iface_name.to_string(), neighbor },
                );
            }
            Ok(None) => {}
            Err(_) => {
                nbr.apply(NeighborEvent::RetransExhausted);
            }
        }
    }

    fn retransmit_multicast(&mut self, iface_name: &str) {
        let Some(iface) = self.interfaces.get_mut(iface_name) else { return };
        let Some(held) = iface.multicast_queue.front().cloned() else { return };
        let packet = held.packet.packet.clone();
        let behind = held.pending_acks.clone();
        for n in behind {
            self.queue_send(iface_name, Destination::Unicast(n), packet.clone());
        }
        self.scheduler.schedule(RETRANS_TIME, InstanceTimerEvent::MulticastRetransmit { iface: iface_name.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthKey;
    use crate::config::InstanceConfigBuilder;
    use crate::external::{Direction, PermitAll};
    use crate::interface::InterfaceType;
    use crate::metric::KValues;

    #[derive(Default)]
    struct NullKeychain;
    impl Keychain for NullKeychain {
        fn send_key(&self, _iface: &str) -> Option<AuthKey> {
            None
        }
        fn key_by_id(&self, _iface: &str, _key_id: u32) -> Option<AuthKey> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingRouteManager {
        installed: Vec<(Prefix, Vec<Ipv4Addr>)>,
        withdrawn: Vec<Prefix>,
    }
    impl RouteManager for RecordingRouteManager {
        fn install(&mut self, prefix: Prefix, next_hops: &[Ipv4Addr]) {
            self.installed.push((prefix, next_hops.to_vec()));
        }
        fn withdraw(&mut self, prefix: Prefix) {
            self.withdrawn.push(prefix);
        }
    }

    fn test_instance() -> (Instance, std::sync::Arc<std::sync::Mutex<RecordingRouteManager>>) {
        let config = InstanceConfigBuilder::default().as_number(1).k_values(KValues::default()).build().unwrap();
        let recorder = std::sync::Arc::new(std::sync::Mutex::new(RecordingRouteManager::default()));
        struct Shared(std::sync::Arc<std::sync::Mutex<RecordingRouteManager>>);
        impl RouteManager for Shared {
            fn install(&mut self, prefix: Prefix, next_hops: &[Ipv4Addr]) {
                self.0.lock().unwrap().install(prefix, next_hops);
            }
            fn withdraw(&mut self, prefix: Prefix) {
                self.0.lock().unwrap().withdraw(prefix);
            }
        }
        let mut instance = Instance::new(
            config,
            Box::new(Shared(recorder.clone())),
            Box::new(NullKeychain),
            Box::new(PermitAll),
        )
        .unwrap();
        instance.add_interface(Interface::new("eth0", InterfaceType::Broadcast, Ipv4Addr::new(10, 0, 0, 2)));
        (instance, recorder)
    }

    #[test]
    fn hello_brings_neighbor_to_pending_and_queues_init_update() {
        let (mut instance, _recorder) = test_instance();
        let from = Ipv4Addr::new(10, 0, 0, 1);
        let header = Header { opcode: Opcode::Hello, flags: 0, sequence: 0, ack: 0, virtual_router_id: 0, as_number: 1 };
        let packet = Packet::new(
            header,
            vec![Tlv::Parameter(crate::wire::tlv::Parameter { k: KValues::default(), hold_time: 15 })],
        );
        let raw = packet.encode();
        instance.receive("eth0", from, packet, &raw).unwrap();

        let nbr = &instance.interfaces["eth0"].neighbors[&from];
        assert_eq!(nbr.state, SessionState::Pending);
        assert!(nbr.init_sequence_number.is_some());
        let sends = instance.take_outbound();
        assert!(sends.iter().any(|s| s.dest == Destination::Unicast(from)));
    }

    #[test]
    fn acking_our_init_update_brings_neighbor_up_and_sends_eot() {
        let (mut instance, _recorder) = test_instance();
        let from = Ipv4Addr::new(10, 0, 0, 1);
        let hello = Packet::new(
            Header { opcode: Opcode::Hello, flags: 0, sequence: 0, ack: 0, virtual_router_id: 0, as_number: 1 },
            vec![Tlv::Parameter(crate::wire::tlv::Parameter { k: KValues::default(), hold_time: 15 })],
        );
        let raw = hello.encode();
        instance.receive("eth0", from, hello, &raw).unwrap();
        instance.take_outbound();

        let init_seq = instance.interfaces["eth0"].neighbors[&from].init_sequence_number.unwrap();
        let ack = Packet::new(
            Header { opcode: Opcode::Ack, flags: 0, sequence: 0, ack: init_seq, virtual_router_id: 0, as_number: 1 },
            vec![],
        );
        let raw = ack.encode();
        instance.receive("eth0", from, ack, &raw).unwrap();

        assert_eq!(instance.interfaces["eth0"].neighbors[&from].state, SessionState::Up);
        let sends = instance.take_outbound();
        assert!(sends.iter().any(|s| {
            s.dest == Destination::Unicast(from) && s.packet.header.has_flag(FLAG_EOT)
        }));
    }

    #[test]
    fn update_installs_route_for_reachable_prefix() {
        let (mut instance, recorder) = test_instance();
        let from = Ipv4Addr::new(10, 0, 0, 1);
        let prefix = Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24);
        let header = Header { opcode: Opcode::Update, flags: FLAG_EOT, sequence: 7, ack: 0, virtual_router_id: 0, as_number: 1 };
        let entry = crate::wire::tlv::InternalEntry {
            next_hop: Ipv4Addr::new(0, 0, 0, 0),
            metric: crate::metric::VectorMetric::from_link(10_000, 100, 1500),
            prefix,
        };
        let packet = Packet::new(header, vec![Tlv::Ipv4Internal(entry)]);
        let raw = packet.encode();
        instance.receive("eth0", from, packet, &raw).unwrap();

        assert_eq!(recorder.lock().unwrap().installed.len(), 1);
        assert!(instance.topology.get(&prefix).unwrap().is_reachable());
    }

    #[test]
    fn query_on_reachable_prefix_gets_immediate_reply() {
        let (mut instance, _recorder) = test_instance();
        let from = Ipv4Addr::new(10, 0, 0, 1);
        let prefix = Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24);
        let entry = crate::wire::tlv::InternalEntry {
            next_hop: Ipv4Addr::new(0, 0, 0, 0),
            metric: crate::metric::VectorMetric::from_link(10_000, 100, 1500),
            prefix,
        };
        let update = Packet::new(
            Header { opcode: Opcode::Update, flags: FLAG_EOT, sequence: 1, ack: 0, virtual_router_id: 0, as_number: 1 },
            vec![Tlv::Ipv4Internal(entry)],
        );
        let raw = update.encode();
        instance.receive("eth0", from, update, &raw).unwrap();
        instance.take_outbound();

        let querier = Ipv4Addr::new(10, 0, 0, 9);
        let query = Packet::new(
            Header { opcode: Opcode::Query, flags: 0, sequence: 2, ack: 0, virtual_router_id: 0, as_number: 1 },
            vec![Tlv::Ipv4Internal(entry)],
        );
        let raw = query.encode();
        instance.receive("eth0", querier, query, &raw).unwrap();

        let sends = instance.take_outbound();
        assert!(sends.iter().any(|s| s.packet.header.opcode == Opcode::Reply && s.dest == Destination::Unicast(querier)));
    }

    #[test]
    fn sia_reply_resets_fire_count_without_completing() {
        use crate::topology::dual::Fsm;
        let mut fsm = Fsm::new();
        let n1 = Ipv4Addr::new(10, 0, 0, 1);
        fsm.go_active(vec![n1], false);
        let (_, count) = fsm.sia_timer_fire();
        assert_eq!(count, 1);
        fsm.receive_sia_reply(n1);
        assert_eq!(fsm.sia_fire_count(), 0);
        assert!(!fsm.is_complete());
    }

    #[test]
    fn filtered_prefix_is_never_installed() {
        struct DenyAll;
        impl FilterPredicate for DenyAll {
            fn permits(&self, _iface: &str, _direction: Direction, _prefix: &Prefix) -> bool {
                false
            }
        }
        let config = InstanceConfigBuilder::default().as_number(1).build().unwrap();
        let recorder = std::sync::Arc::new(std::sync::Mutex::new(RecordingRouteManager::default()));
        struct Shared(std::sync::Arc<std::sync::Mutex<RecordingRouteManager>>);
        impl RouteManager for Shared {
            fn install(&mut self, prefix: Prefix, next_hops: &[Ipv4Addr]) {
                self.0.lock().unwrap().install(prefix, next_hops);
            }
            fn withdraw(&mut self, prefix: Prefix) {
                self.0.lock().unwrap().withdraw(prefix);
            }
        }
        let mut instance = Instance::new(config, Box::new(Shared(recorder.clone())), Box::new(NullKeychain), Box::new(DenyAll)).unwrap();
        instance.add_interface(Interface::new("eth0", InterfaceType::Broadcast, Ipv4Addr::new(10, 0, 0, 2)));

        let from = Ipv4Addr::new(10, 0, 0, 1);
        let prefix = Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24);
        let header = Header { opcode: Opcode::Update, flags: FLAG_EOT, sequence: 1, ack: 0, virtual_router_id: 0, as_number: 1 };
        let entry = crate::wire::tlv::InternalEntry {
            next_hop: Ipv4Addr::new(0, 0, 0, 0),
            metric: crate::metric::VectorMetric::from_link(10_000, 100, 1500),
            prefix,
        };
        let packet = Packet::new(header, vec![Tlv::Ipv4Internal(entry)]);
        let raw = packet.encode();
        instance.receive("eth0", from, packet, &raw).unwrap();

        assert!(recorder.lock().unwrap().installed.is_empty());
    }

    #[test]
    fn crypt_seqnum_replay_is_rejected() {
        let from = Ipv4Addr::new(10, 0, 0, 1);
        let key = AuthKey { key_id: 1, key: b"secret".to_vec() };

        struct OneKeyKeychain(AuthKey);
        impl Keychain for OneKeyKeychain {
            fn send_key(&self, _iface: &str) -> Option<AuthKey> {
                Some(self.0.clone())
            }
            fn key_by_id(&self, _iface: &str, key_id: u32) -> Option<AuthKey> {
                (key_id == self.0.key_id).then(|| self.0.clone())
            }
        }

        let config = InstanceConfigBuilder::default().as_number(1).k_values(KValues::default()).build().unwrap();
        let mut instance = Instance::new(config, Box::new(RecordingRouteManagerNoop), Box::new(OneKeyKeychain(key.clone())), Box::new(PermitAll)).unwrap();
        instance.add_interface(Interface::new("eth0", InterfaceType::Broadcast, Ipv4Addr::new(10, 0, 0, 2)));

        let build_hello = |seq: u32| {
            let mut packet = Packet::new(
                Header { opcode: Opcode::Hello, flags: 0, sequence: 0, ack: 0, virtual_router_id: 0, as_number: 1 },
                vec![
                    Tlv::Authentication(crate::wire::tlv::AuthTlv {
                        kind: crate::wire::tlv::AuthKind::Md5,
                        key_id: 1,
                        key_sequence: seq,
                        digest: vec![0u8; 16],
                    }),
                    Tlv::Parameter(crate::wire::tlv::Parameter { k: KValues::default(), hold_time: 15 }),
                ],
            );
            let raw = packet.encode();
            crate::auth::sign(&mut packet, &raw, &key, crate::wire::tlv::AuthKind::Md5).unwrap();
            packet
        };

        let first = build_hello(10);
        let raw = first.encode();
        instance.receive("eth0", from, first, &raw).unwrap();

        let replay = build_hello(5);
        let raw = replay.encode();
        assert!(instance.receive("eth0", from, replay, &raw).is_err());
    }

    #[derive(Default)]
    struct RecordingRouteManagerNoop;
    impl RouteManager for RecordingRouteManagerNoop {
        fn install(&mut self, _prefix: Prefix, _next_hops: &[Ipv4Addr]) {}
        fn withdraw(&mut self, _prefix: Prefix) {}
    }
}
