//! A single typed-event scheduler shared by every timer in the daemon.
//!
//! Per the concurrency design, there is no per-neighbor or per-interface
//! thread: every hold timer, hello cadence, SIA timer and retransmit
//! backoff becomes one entry in this scheduler, and cancellation is a
//! token flip rather than dropping a task handle.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Identifies a scheduled timer so it can be cancelled before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

/// What the timer is for — the scheduler is generic over this so callers
/// don't need a trait object per event kind.
pub trait TimerEvent: Clone + std::fmt::Debug {}
impl<T: Clone + std::fmt::Debug> TimerEvent for T {}

struct Entry<E> {
    at: Instant,
    token: TimerToken,
    event: E,
    live: bool,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.token == other.token
    }
}
impl<E> Eq for Entry<E> {}
impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.token.cmp(&other.token))
    }
}

/// A min-heap of pending timers. Cancellation marks an entry dead rather
/// than removing it from the heap, so it's O(1); dead entries are skipped
/// when popped.
pub struct Scheduler<E> {
    heap: BinaryHeap<Reverse<Entry<E>>>,
    live: std::collections::HashSet<TimerToken>,
    next_token: u64,
}

impl<E: TimerEvent> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TimerEvent> Scheduler<E> {
    pub fn new() -> Self {
        Scheduler { heap: BinaryHeap::new(), live: std::collections::HashSet::new(), next_token: 0 }
    }

    /// Schedules `event` to fire after `delay` and returns a token that
    /// can later cancel it.
    pub fn schedule(&mut self, delay: Duration, event: E) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.live.insert(token);
        self.heap.push(Reverse(Entry { at: Instant::now() + delay, token, event, live: true }));
        token
    }

    /// Cancels a previously scheduled timer. A no-op if it already fired
    /// or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) {
        self.live.remove(&token);
    }

    /// Reschedules by cancelling `token` (if still live) and scheduling a
    /// fresh timer — the common "reset the hold timer" pattern.
    pub fn reschedule(&mut self, token: TimerToken, delay: Duration, event: E) -> TimerToken {
        self.cancel(token);
        self.schedule(delay, event)
    }

    /// Returns the duration until the next live timer fires, if any —
    /// what the event loop blocks on between iterations.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.peek_live().map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn peek_live(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|Reverse(e)| self.live.contains(&e.token))
            .map(|Reverse(e)| e.at)
            .min()
    }

    /// Pops and returns every event whose deadline has passed, in
    /// deadline order, skipping cancelled ones.
    pub fn poll(&mut self) -> Vec<E> {
        let now = Instant::now();
        let mut fired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.at > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            if self.live.remove(&entry.token) {
                fired.push(entry.event);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Ev {
        Hold,
        Hello,
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        let token = s.schedule(Duration::from_millis(0), Ev::Hold);
        s.cancel(token);
        assert!(s.poll().is_empty());
    }

    #[test]
    fn due_timers_fire_in_order() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule(Duration::from_millis(0), Ev::Hello);
        s.schedule(Duration::from_millis(0), Ev::Hold);
        std::thread::sleep(Duration::from_millis(5));
        let fired = s.poll();
        assert_eq!(fired.len(), 2);
    }
}
