//! The instance-wide topology table: every known prefix, plus a bounded
//! change log and monotonic serial number an operational CLI can use to
//! report "what changed since serial N" without the table itself knowing
//! anything about a CLI.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::address::Prefix;
use crate::topology::prefix::PrefixDescriptor;

const CHANGE_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub serial: u64,
    pub prefix: Prefix,
    pub reachable: bool,
}

#[derive(Debug, Default)]
pub struct TopologyTable {
    prefixes: HashMap<Prefix, PrefixDescriptor>,
    serial: u64,
    changes: VecDeque<ChangeRecord>,
}

impl TopologyTable {
    pub fn new() -> Self {
        TopologyTable { prefixes: HashMap::new(), serial: 0, changes: VecDeque::new() }
    }

    pub fn entry(&mut self, prefix: Prefix) -> &mut PrefixDescriptor {
        self.prefixes.entry(prefix).or_insert_with(|| PrefixDescriptor::new(prefix))
    }

    pub fn get(&self, prefix: &Prefix) -> Option<&PrefixDescriptor> {
        self.prefixes.get(prefix)
    }

    pub fn remove(&mut self, prefix: &Prefix) {
        self.prefixes.remove(prefix);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrefixDescriptor> {
        self.prefixes.values()
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Records that `prefix`'s reachability changed, bumping the serial
    /// number and appending to the bounded ring buffer an operational CLI
    /// can drain.
    pub fn record_change(&mut self, prefix: Prefix, reachable: bool) {
        self.serial += 1;
        if self.changes.len() >= CHANGE_LOG_CAPACITY {
            self.changes.pop_front();
        }
        self.changes.push_back(ChangeRecord { serial: self.serial, prefix, reachable });
    }

    /// Changes recorded after `since_serial`, oldest first.
    pub fn changes_since(&self, since_serial: u64) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(move |c| c.serial > since_serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn recording_changes_bumps_serial() {
        let mut t = TopologyTable::new();
        let p = Prefix::new(Ipv4Addr::new(10, 0, 0, 0), 24);
        assert_eq!(t.serial(), 0);
        t.record_change(p, true);
        assert_eq!(t.serial(), 1);
        assert_eq!(t.changes_since(0).count(), 1);
        assert_eq!(t.changes_since(1).count(), 0);
    }

    #[test]
    fn change_log_is_bounded() {
        let mut t = TopologyTable::new();
        let p = Prefix::new(Ipv4Addr::new(10, 0, 0, 0), 24);
        for _ in 0..(CHANGE_LOG_CAPACITY + 10) {
            t.record_change(p, true);
        }
        assert_eq!(t.changes_since(0).count(), CHANGE_LOG_CAPACITY);
    }
}
