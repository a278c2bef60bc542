//! DUAL: the diffusing update algorithm's finite state machine.
//!
//! A prefix starts Passive whenever it has a feasible successor. Losing
//! all feasible successors sends it Active, fanning Query packets out to
//! every remaining neighbor on the prefix and waiting for every Reply
//! before going back Passive with a new successor set. The four active
//! sub-states distinguish whether a second topology change arrived while
//! already active (1/3) from a plain active computation (0/2), and
//! whether the change was a metric increase needing full requery (2/3)
//! or not (0/1) — mirrored from the classic DUAL state table rather than
//! collapsed to a plain bool, since a query arriving mid-active changes
//! what happens when replies finish.

use std::collections::HashSet;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualState {
    Passive,
    Active(ActiveKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveKind {
    /// Active from a local computation; no further change queued.
    Active0,
    /// Active from a local computation; a second change arrived and is
    /// queued for re-evaluation once replies finish.
    Active1,
    /// Active from a query received while passive; no further change
    /// queued.
    Active2,
    /// Active from a query received while passive, with a queued change.
    Active3,
}

impl ActiveKind {
    fn with_queued_change(self) -> Self {
        match self {
            ActiveKind::Active0 => ActiveKind::Active1,
            ActiveKind::Active2 => ActiveKind::Active3,
            already_queued => already_queued,
        }
    }
}

/// Tracks one prefix's DUAL computation: which neighbors still owe a
/// Reply before this router can go back Passive.
#[derive(Debug, Clone, Default)]
pub struct DiffusingComputation {
    pub awaiting_replies: HashSet<Ipv4Addr>,
    /// SIA-timer firings since the last Reply or SIA-Reply for this
    /// computation; forced down after the second unanswered firing.
    pub sia_fire_count: u8,
}

impl DiffusingComputation {
    pub fn new(queried: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        DiffusingComputation { awaiting_replies: queried.into_iter().collect(), sia_fire_count: 0 }
    }

    pub fn receive_reply(&mut self, from: Ipv4Addr) {
        self.awaiting_replies.remove(&from);
    }

    pub fn is_complete(&self) -> bool {
        self.awaiting_replies.is_empty()
    }
}

/// The DUAL FSM for a single prefix, decoupled from the route table so it
/// can be unit tested without a full `TopologyTable`.
#[derive(Debug, Clone, Default)]
pub struct Fsm {
    state: Option<DualState>,
    computation: Option<DiffusingComputation>,
}

impl Fsm {
    pub fn new() -> Self {
        Fsm { state: Some(DualState::Passive), computation: None }
    }

    pub fn state(&self) -> DualState {
        self.state.unwrap_or(DualState::Passive)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), DualState::Active(_))
    }

    /// All feasible successors were lost: go active, querying `neighbors`.
    /// If already active, the change is queued instead of restarting the
    /// computation (re-querying while replies are outstanding would never
    /// converge).
    pub fn go_active(&mut self, neighbors: impl IntoIterator<Item = Ipv4Addr>, from_query: bool) {
        match self.state() {
            DualState::Passive => {
                let kind = if from_query { ActiveKind::Active2 } else { ActiveKind::Active0 };
                self.state = Some(DualState::Active(kind));
                self.computation = Some(DiffusingComputation::new(neighbors));
            }
            DualState::Active(kind) => {
                self.state = Some(DualState::Active(kind.with_queued_change()));
            }
        }
    }

    /// Records a Reply from `from`. Returns `true` once every outstanding
    /// neighbor has replied and the prefix is ready to either settle
    /// Passive or restart with the queued change.
    pub fn receive_reply(&mut self, from: Ipv4Addr) -> bool {
        if let Some(computation) = &mut self.computation {
            computation.receive_reply(from);
            computation.is_complete()
        } else {
            false
        }
    }

    /// Records an SIA-Reply from `from`: resets the SIA fire count but,
    /// unlike a plain Reply, never completes the computation — the
    /// neighbor is still actively working on the query.
    pub fn receive_sia_reply(&mut self, from: Ipv4Addr) {
        if let Some(computation) = &mut self.computation {
            if computation.awaiting_replies.contains(&from) {
                computation.sia_fire_count = 0;
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.computation {
            Some(computation) => computation.is_complete(),
            None => true,
        }
    }

    /// The SIA timer fired for this prefix: bumps the fire count and
    /// returns the neighbors still outstanding, along with the new count.
    pub fn sia_timer_fire(&mut self) -> (Vec<Ipv4Addr>, u8) {
        let Some(computation) = &mut self.computation else {
            return (Vec::new(), 0);
        };
        computation.sia_fire_count += 1;
        (computation.awaiting_replies.iter().copied().collect(), computation.sia_fire_count)
    }

    pub fn sia_fire_count(&self) -> u8 {
        self.computation.as_ref().map_or(0, |c| c.sia_fire_count)
    }

    pub fn outstanding(&self) -> Vec<Ipv4Addr> {
        self.computation
            .as_ref()
            .map(|c| c.awaiting_replies.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Settles back to Passive, or immediately restarts a new computation
    /// if a change was queued while replies were outstanding (Active1/3).
    pub fn finish(&mut self, requery: impl FnOnce() -> Vec<Ipv4Addr>) {
        let kind = match self.state() {
            DualState::Active(kind) => kind,
            DualState::Passive => return,
        };
        match kind {
            ActiveKind::Active0 | ActiveKind::Active2 => {
                self.state = Some(DualState::Passive);
                self.computation = None;
            }
            ActiveKind::Active1 | ActiveKind::Active3 => {
                let neighbors = requery();
                self.state = Some(DualState::Active(ActiveKind::Active0));
                self.computation = Some(DiffusingComputation::new(neighbors));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    #[test]
    fn passive_to_active_to_passive() {
        let mut fsm = Fsm::new();
        assert_eq!(fsm.state(), DualState::Passive);
        fsm.go_active(vec![addr(1), addr(2)], false);
        assert!(fsm.is_active());
        assert!(!fsm.receive_reply(addr(1)));
        assert!(fsm.receive_reply(addr(2)));
        fsm.finish(|| vec![]);
        assert_eq!(fsm.state(), DualState::Passive);
    }

    #[test]
    fn queued_change_while_active_restarts_computation() {
        let mut fsm = Fsm::new();
        fsm.go_active(vec![addr(1)], false);
        fsm.go_active(vec![addr(1)], false);
        assert_eq!(fsm.state(), DualState::Active(ActiveKind::Active1));
        fsm.receive_reply(addr(1));
        fsm.finish(|| vec![addr(3)]);
        assert_eq!(fsm.state(), DualState::Active(ActiveKind::Active0));
    }

    #[test]
    fn query_received_while_passive_is_active2() {
        let mut fsm = Fsm::new();
        fsm.go_active(vec![addr(1)], true);
        assert_eq!(fsm.state(), DualState::Active(ActiveKind::Active2));
    }
}
