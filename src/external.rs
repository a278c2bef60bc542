//! External collaborator contracts: route installation, redistribution
//! and the filter predicate applied to outbound/inbound advertisements.
//! Config parsing, the operator CLI and key storage all live outside this
//! crate and talk to it only through these traits (and [`crate::auth::Keychain`]).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::address::Prefix;
use crate::metric::VectorMetric;
use crate::wire::tlv::ExternalProtocol;

/// Installs and withdraws routes in the host's forwarding table. The
/// instance calls this once per successor-set change; batching multiple
/// prefixes into one call is the implementor's choice.
pub trait RouteManager {
    fn install(&mut self, prefix: Prefix, next_hops: &[Ipv4Addr]);
    fn withdraw(&mut self, prefix: Prefix);
}

/// Direction a prefix is being evaluated in, for `FilterPredicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Route-map/distribute-list style filtering, applied per interface
/// before a prefix is accepted from or advertised to a neighbor.
pub trait FilterPredicate {
    fn permits(&self, iface: &str, direction: Direction, prefix: &Prefix) -> bool;
}

/// A predicate that permits everything — the default when no filter is
/// configured on an interface.
pub struct PermitAll;
impl FilterPredicate for PermitAll {
    fn permits(&self, _iface: &str, _direction: Direction, _prefix: &Prefix) -> bool {
        true
    }
}

/// The default `VectorMetric` applied to a route redistributed from
/// another protocol when no explicit `redistribute PROTO metric ...`
/// override is given for it. Backs the `redistribute` config line.
#[derive(Debug, Clone, Default)]
pub struct RedistributionMetrics {
    defaults: HashMap<ExternalProtocolKey, VectorMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExternalProtocolKey(u8);

impl From<ExternalProtocol> for ExternalProtocolKey {
    fn from(p: ExternalProtocol) -> Self {
        match p {
            ExternalProtocol::Igrp => ExternalProtocolKey(1),
            ExternalProtocol::Eigrp => ExternalProtocolKey(3),
            ExternalProtocol::Static => ExternalProtocolKey(4),
            ExternalProtocol::Rip => ExternalProtocolKey(5),
            ExternalProtocol::Ospf => ExternalProtocolKey(7),
            ExternalProtocol::Bgp => ExternalProtocolKey(8),
            ExternalProtocol::Connected => ExternalProtocolKey(9),
            ExternalProtocol::Unknown(n) => ExternalProtocolKey(n),
        }
    }
}

impl RedistributionMetrics {
    pub fn new() -> Self {
        RedistributionMetrics::default()
    }

    pub fn set_default(&mut self, protocol: ExternalProtocol, metric: VectorMetric) {
        self.defaults.insert(protocol.into(), metric);
    }

    pub fn default_for(&self, protocol: ExternalProtocol) -> Option<VectorMetric> {
        self.defaults.get(&ExternalProtocolKey::from(protocol)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_all_permits_everything() {
        let p = Prefix::new(Ipv4Addr::new(10, 0, 0, 0), 8);
        assert!(PermitAll.permits("eth0", Direction::Inbound, &p));
    }

    #[test]
    fn redistribution_metric_lookup() {
        let mut m = RedistributionMetrics::new();
        let metric = VectorMetric::from_link(1500, 200, 1500);
        m.set_default(ExternalProtocol::Ospf, metric);
        assert_eq!(m.default_for(ExternalProtocol::Ospf), Some(metric));
        assert_eq!(m.default_for(ExternalProtocol::Bgp), None);
    }
}
