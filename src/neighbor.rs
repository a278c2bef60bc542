//! A single neighbor adjacency and its session state machine.
//!
//! Sessions move `Down -> Pending -> Up` on a successful init exchange and
//! fall back to `Down` on hold expiry, peer termination, K-value mismatch,
//! or retransmission exhaustion — each a `SessionError` per the error
//! taxonomy, converted to a `NeighborEvent::Down` rather than propagated.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::address::Prefix;
use crate::metric::KValues;
use crate::timer::TimerToken;
use crate::transport::queue::RetransmitQueue;
use crate::wire::tlv::SoftwareVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No adjacency; neighbor known only because a Hello was received.
    Down,
    /// Init exchange in progress: we've sent or received the INIT-flagged
    /// Update and are waiting for the peer's full table.
    Pending,
    /// Adjacency established; Hellos are exchanged and routing data flows.
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborEvent {
    HelloReceived,
    InitUpdateReceived,
    /// The ack for our own INIT update came back, matching
    /// `init_sequence_number` — the actual Pending -> Up trigger.
    InitAckReceived,
    HoldExpired,
    PeerTerminated,
    RetransExhausted,
    KValueMismatch,
    /// Two SIA-timer firings passed with no SIA-Reply for an active prefix.
    SiaTimeout,
}

#[derive(Debug)]
pub struct Neighbor {
    pub address: Ipv4Addr,
    pub iface: String,
    pub state: SessionState,
    pub software_version: Option<SoftwareVersion>,
    pub k_values: Option<KValues>,
    pub hold_time: Duration,
    pub hold_timer: Option<TimerToken>,
    pub last_sequence: u32,
    pub crypt_seqnum: u32,
    pub retransmit_queue: RetransmitQueue,
    /// Sequence number of the INIT update we sent this neighbor; its ack
    /// is what actually completes the init exchange on our side.
    pub init_sequence_number: Option<u32>,
    /// Set on receiving an `INIT|RS` Update: the prefixes this neighbor was
    /// contributing routes for before the restart, cleared as matching
    /// Updates arrive and swept (withdrawn as infinite) at EOT.
    pub gr_expected: Option<HashSet<Prefix>>,
    /// Sequence this neighbor must wait for before accepting a
    /// conditional-receive multicast it was suppressed from.
    pub expected_multicast_seq: Option<u32>,
}

impl Neighbor {
    pub fn new(address: Ipv4Addr, iface: impl Into<String>, hold_time: Duration) -> Self {
        Neighbor {
            address,
            iface: iface.into(),
            state: SessionState::Down,
            software_version: None,
            k_values: None,
            hold_time,
            hold_timer: None,
            last_sequence: 0,
            crypt_seqnum: 0,
            retransmit_queue: RetransmitQueue::new(),
            init_sequence_number: None,
            gr_expected: None,
            expected_multicast_seq: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.state == SessionState::Up
    }

    /// Applies an event to the session FSM, returning the new state. Down
    /// transitions always win regardless of current state; the forward
    /// path only advances from the expected predecessor state.
    pub fn apply(&mut self, event: NeighborEvent) -> SessionState {
        use NeighborEvent::*;
        use SessionState::*;

        self.state = match (self.state, &event) {
            (_, HoldExpired | PeerTerminated | RetransExhausted | KValueMismatch | SiaTimeout) => Down,
            (Down, HelloReceived) => Pending,
            (Down, InitUpdateReceived) => Pending,
            (Pending, InitAckReceived) => Up,
            (Up, HelloReceived) => Up,
            (state, _) => state,
        };
        self.state
    }

    /// Replay protection for the crypt-sequence-number authentication
    /// scheme: an incoming packet's sequence must be no lower than the
    /// last one accepted from this neighbor.
    pub fn accept_crypt_seqnum(&mut self, seqnum: u32) -> bool {
        if seqnum < self.crypt_seqnum {
            return false;
        }
        self.crypt_seqnum = seqnum;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nbr() -> Neighbor {
        Neighbor::new(Ipv4Addr::new(10, 0, 0, 1), "eth0", Duration::from_secs(15))
    }

    #[test]
    fn full_session_establishment() {
        let mut n = nbr();
        assert_eq!(n.apply(NeighborEvent::HelloReceived), SessionState::Pending);
        assert_eq!(n.apply(NeighborEvent::InitAckReceived), SessionState::Up);
        assert!(n.is_up());
    }

    #[test]
    fn hold_expiry_always_drops_to_down() {
        let mut n = nbr();
        n.apply(NeighborEvent::HelloReceived);
        n.apply(NeighborEvent::InitAckReceived);
        assert_eq!(n.apply(NeighborEvent::HoldExpired), SessionState::Down);
    }

    #[test]
    fn crypt_seqnum_rejects_replay() {
        let mut n = nbr();
        assert!(n.accept_crypt_seqnum(10));
        assert!(!n.accept_crypt_seqnum(5));
        assert!(n.accept_crypt_seqnum(11));
    }
}
