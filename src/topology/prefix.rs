//! A single destination's full topology state: every neighbor's
//! advertisement of it, the current successor set, and its DUAL FSM.

use std::net::Ipv4Addr;

use crate::address::Prefix;
use crate::metric::CompositeDistance;
use crate::topology::dual::Fsm;
use crate::topology::route::RouteDescriptor;

#[derive(Debug, Clone)]
pub struct PrefixDescriptor {
    pub prefix: Prefix,
    pub routes: Vec<RouteDescriptor>,
    pub fsm: Fsm,
    /// The feasible distance: the best distance ever advertised for this
    /// prefix while passive, used by the feasibility condition. Only
    /// lowered while passive; held fixed during an active computation.
    pub feasible_distance: CompositeDistance,
    /// Neighbors that queried us for this prefix while it was already
    /// active: queued to get a Reply once our own computation settles,
    /// rather than replied to immediately.
    pub pending_repliers: Vec<Ipv4Addr>,
}

impl PrefixDescriptor {
    pub fn new(prefix: Prefix) -> Self {
        PrefixDescriptor {
            prefix,
            routes: Vec::new(),
            fsm: Fsm::new(),
            feasible_distance: CompositeDistance::INFINITY,
            pending_repliers: Vec::new(),
        }
    }

    pub fn route_mut(&mut self, via: Ipv4Addr) -> Option<&mut RouteDescriptor> {
        self.routes.iter_mut().find(|r| r.via_neighbor == via)
    }

    pub fn upsert_route(&mut self, route: RouteDescriptor) {
        if let Some(existing) = self.route_mut(route.via_neighbor) {
            *existing = route;
        } else {
            self.routes.push(route);
        }
    }

    pub fn remove_route(&mut self, via: Ipv4Addr) {
        self.routes.retain(|r| r.via_neighbor != via);
    }

    /// Recomputes the successor set: every route within `variance` of the
    /// minimum distance among feasible routes, capped at `max_paths`,
    /// sorted best-first for equal-cost or unequal-cost (variance > 1)
    /// load sharing.
    ///
    /// Returns the new feasible distance (the minimum distance among
    /// feasible routes) so the caller can update `feasible_distance` only
    /// while passive — recomputing it mid-active would break the
    /// feasibility condition for the very computation in progress.
    pub fn recompute_successors(&mut self, variance: u8, max_paths: u8) -> Option<CompositeDistance> {
        for r in &mut self.routes {
            r.is_feasible_successor = r.is_feasible(self.feasible_distance);
            r.is_successor = false;
        }

        let min_distance = self
            .routes
            .iter()
            .filter(|r| r.is_feasible_successor)
            .map(|r| r.distance)
            .min()?;

        let mut candidates: Vec<usize> = self
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_feasible_successor && min_distance.within_variance(r.distance, variance))
            .map(|(i, _)| i)
            .collect();

        candidates.sort_by_key(|&i| self.routes[i].distance);
        candidates.truncate(max_paths.max(1) as usize);

        for i in &candidates {
            self.routes[*i].is_successor = true;
        }

        Some(min_distance)
    }

    pub fn successors(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter().filter(|r| r.is_successor)
    }

    pub fn is_reachable(&self) -> bool {
        self.routes.iter().any(|r| r.is_successor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::VectorMetric;
    use std::net::Ipv4Addr;

    fn route(via: u8, reported: u64, distance: u64) -> RouteDescriptor {
        RouteDescriptor::new(
            Ipv4Addr::new(10, 0, 0, via),
            CompositeDistance(reported),
            CompositeDistance(distance),
            VectorMetric::unreachable(),
        )
    }

    #[test]
    fn single_best_successor_with_variance_one() {
        let mut p = PrefixDescriptor::new(Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24));
        p.feasible_distance = CompositeDistance::INFINITY;
        p.upsert_route(route(1, 100, 200));
        p.upsert_route(route(2, 150, 300));
        let fd = p.recompute_successors(1, 4).unwrap();
        assert_eq!(fd, CompositeDistance(200));
        assert_eq!(p.successors().count(), 1);
        assert_eq!(p.successors().next().unwrap().via_neighbor, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn unequal_cost_load_share_within_variance() {
        let mut p = PrefixDescriptor::new(Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24));
        p.feasible_distance = CompositeDistance::INFINITY;
        p.upsert_route(route(1, 100, 200));
        p.upsert_route(route(2, 100, 300));
        p.recompute_successors(2, 4);
        assert_eq!(p.successors().count(), 2);
    }

    #[test]
    fn infeasible_route_excluded_from_successors() {
        let mut p = PrefixDescriptor::new(Prefix::new(Ipv4Addr::new(192, 168, 1, 0), 24));
        p.feasible_distance = CompositeDistance(150);
        p.upsert_route(route(1, 100, 200));
        // reported distance 200 is not < feasible_distance 150: not feasible.
        p.upsert_route(route(2, 200, 250));
        p.recompute_successors(1, 4);
        assert_eq!(p.successors().count(), 1);
        assert_eq!(p.successors().next().unwrap().via_neighbor, Ipv4Addr::new(10, 0, 0, 1));
    }
}
