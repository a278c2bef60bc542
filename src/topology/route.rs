//! A single neighbor's advertisement of a prefix: the row DUAL compares
//! against the feasibility condition to decide successor/feasible
//! successor membership.

use std::net::Ipv4Addr;

use crate::metric::{CompositeDistance, VectorMetric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub via_neighbor: Ipv4Addr,
    /// The neighbor's own reported distance to the destination — the
    /// value compared against this router's feasible distance in the
    /// feasibility condition.
    pub reported_distance: CompositeDistance,
    /// This router's distance through `via_neighbor`: the link metric to
    /// the neighbor composed with its reported vector.
    pub distance: CompositeDistance,
    pub metric: VectorMetric,
    pub is_successor: bool,
    pub is_feasible_successor: bool,
}

impl RouteDescriptor {
    pub fn new(via_neighbor: Ipv4Addr, reported_distance: CompositeDistance, distance: CompositeDistance, metric: VectorMetric) -> Self {
        RouteDescriptor {
            via_neighbor,
            reported_distance,
            distance,
            metric,
            is_successor: false,
            is_feasible_successor: false,
        }
    }

    /// The feasibility condition: a neighbor's reported distance must be
    /// strictly less than this router's own feasible distance to the
    /// destination, which rules out routing loops without needing a full
    /// query.
    pub fn is_feasible(&self, feasible_distance: CompositeDistance) -> bool {
        self.reported_distance < feasible_distance
    }

    /// A self-originated directly connected route: always feasible
    /// (reported distance zero), `via_neighbor` set to the unspecified
    /// address so route installation can recognize and skip it.
    pub fn connected(distance: CompositeDistance, metric: VectorMetric) -> Self {
        RouteDescriptor::new(Ipv4Addr::UNSPECIFIED, CompositeDistance(0), distance, metric)
    }

    pub fn is_connected(&self) -> bool {
        self.via_neighbor == Ipv4Addr::UNSPECIFIED
    }
}
