//! Vector metrics and the composite distance formula.
//!
//! EIGRP carries a *vector* metric (bandwidth, delay, reliability, load,
//! MTU, hop count) on the wire and reduces it to a single scalar
//! `CompositeDistance` for route comparison using the classic K-value
//! formula. The reduction here follows the form actually in wide use
//! (K1=K3=1, others 0 gives `D = bandwidth + delay`), not the FRR source's
//! term ordering, which mis-associates the K5/K4 scaling term — see the
//! design notes for why this crate pins the conventional order instead.

use std::cmp::Ordering;

/// Saturating "this route is unreachable" sentinel, matching the wire value
/// `0xFFFFFFFF` used for an infinite metric.
pub const METRIC_INFINITY: u32 = u32::MAX;

/// The seven classic-mode tuning weights carried in the Parameter TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KValues {
    pub k1: u8,
    pub k2: u8,
    pub k3: u8,
    pub k4: u8,
    pub k5: u8,
}

impl Default for KValues {
    fn default() -> Self {
        // Conventional EIGRP defaults: bandwidth + delay, nothing else.
        KValues { k1: 1, k2: 0, k3: 1, k4: 0, k5: 0 }
    }
}

/// The vector metric as carried on the wire for an internal/external route:
/// scaled bandwidth and delay, reliability and load as 8-bit fractions,
/// MTU and hop count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorMetric {
    /// Scaled bandwidth: `10_000_000 / kbps * 256`, saturating.
    pub bandwidth: u32,
    /// Scaled delay: microseconds / 10, saturating.
    pub delay: u32,
    pub reliability: u8,
    pub load: u8,
    pub mtu: u32,
    pub hop_count: u8,
}

impl VectorMetric {
    /// Builds a metric from real-world link characteristics.
    pub fn from_link(bandwidth_kbps: u32, delay_us: u32, mtu: u32) -> Self {
        VectorMetric {
            bandwidth: bandwidth_to_scaled(bandwidth_kbps),
            delay: delay_to_scaled(delay_us),
            reliability: 255,
            load: 1,
            mtu,
            hop_count: 0,
        }
    }

    /// Unreachable sentinel metric: infinite bandwidth term, hop count 0xFF.
    pub fn unreachable() -> Self {
        VectorMetric {
            bandwidth: METRIC_INFINITY,
            delay: METRIC_INFINITY,
            reliability: 0,
            load: 0,
            mtu: 0,
            hop_count: 255,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.bandwidth == METRIC_INFINITY || self.delay == METRIC_INFINITY
    }

    /// Composes a downstream metric by taking the worse of self and an
    /// upstream link's vector, and adding one hop — the operation applied
    /// at every hop along a path to get a neighbor's reported metric from
    /// its own successor's advertised vector plus the link to it.
    pub fn compose(&self, link: &VectorMetric) -> VectorMetric {
        if self.is_unreachable() || link.is_unreachable() {
            return VectorMetric::unreachable();
        }
        VectorMetric {
            bandwidth: self.bandwidth.min(link.bandwidth),
            delay: self.delay.saturating_add(link.delay),
            reliability: self.reliability.min(link.reliability),
            load: self.load.max(link.load),
            mtu: self.mtu.min(link.mtu),
            hop_count: self.hop_count.saturating_add(1),
        }
    }

    /// Reduces the vector to a scalar composite distance under the given
    /// K-values. Any additive term whose K is zero is omitted entirely
    /// (not merely multiplied by zero) per the classic formula; the
    /// K5/(reliability+K4) scaling factor is applied only when K5 is
    /// non-zero.
    pub fn composite_distance(&self, k: &KValues) -> CompositeDistance {
        if self.is_unreachable() {
            return CompositeDistance::INFINITY;
        }

        let mut sum: u64 = 0;
        if k.k1 != 0 {
            sum = sum.saturating_add(u64::from(k.k1) * u64::from(self.bandwidth));
        }
        if k.k2 != 0 {
            let denom = 256u32.saturating_sub(u32::from(self.load)).max(1);
            sum = sum.saturating_add(u64::from(k.k2) * u64::from(self.bandwidth) / u64::from(denom));
        }
        if k.k3 != 0 {
            sum = sum.saturating_add(u64::from(k.k3) * u64::from(self.delay));
        }

        if k.k5 != 0 {
            let denom = u64::from(self.reliability) + u64::from(k.k4);
            if denom > 0 {
                sum = sum.saturating_mul(u64::from(k.k5)) / denom;
            }
        }

        CompositeDistance(sum)
    }
}

/// A reduced, comparable scalar distance. Lower is better; `Ord` is derived
/// from the wrapped value so routes can be sorted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompositeDistance(pub u64);

impl CompositeDistance {
    pub const INFINITY: CompositeDistance = CompositeDistance(u64::MAX);

    pub fn is_infinite(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Whether `other` is within `variance` times this distance — the
    /// feasible-successor acceptance test used when `variance > 1`.
    pub fn within_variance(&self, other: CompositeDistance, variance: u8) -> bool {
        other.0 <= self.0.saturating_mul(u64::from(variance.max(1)))
    }
}

impl std::cmp::PartialOrd<u64> for CompositeDistance {
    fn partial_cmp(&self, other: &u64) -> Option<Ordering> {
        self.0.partial_cmp(other)
    }
}

/// `10_000_000 / kbps * 256`, saturating at `METRIC_INFINITY` for
/// zero/near-zero bandwidth.
pub fn bandwidth_to_scaled(kbps: u32) -> u32 {
    if kbps == 0 {
        return METRIC_INFINITY;
    }
    let scaled = (10_000_000u64 * 256) / u64::from(kbps);
    scaled.min(u64::from(METRIC_INFINITY)) as u32
}

pub fn scaled_to_bandwidth(scaled: u32) -> u32 {
    if scaled == 0 {
        return u32::MAX;
    }
    ((10_000_000u64 * 256) / u64::from(scaled)) as u32
}

/// Microseconds to tenths-of-microseconds scaled delay.
pub fn delay_to_scaled(delay_us: u32) -> u32 {
    delay_us.saturating_mul(256) / 10
}

pub fn scaled_to_delay(scaled: u32) -> u32 {
    scaled.saturating_mul(10) / 256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_k_values_give_bandwidth_plus_delay() {
        let m = VectorMetric {
            bandwidth: 1000,
            delay: 500,
            reliability: 255,
            load: 1,
            mtu: 1500,
            hop_count: 1,
        };
        let d = m.composite_distance(&KValues::default());
        assert_eq!(d, CompositeDistance(1500));
    }

    #[test]
    fn unreachable_metric_is_infinite_distance() {
        let m = VectorMetric::unreachable();
        let d = m.composite_distance(&KValues::default());
        assert!(d.is_infinite());
    }

    #[test]
    fn compose_takes_min_bandwidth_and_sums_delay() {
        let successor = VectorMetric { bandwidth: 1000, delay: 100, reliability: 255, load: 1, mtu: 1500, hop_count: 2 };
        let link = VectorMetric { bandwidth: 2000, delay: 50, reliability: 255, load: 1, mtu: 1500, hop_count: 0 };
        let composed = successor.compose(&link);
        assert_eq!(composed.bandwidth, 1000);
        assert_eq!(composed.delay, 150);
        assert_eq!(composed.hop_count, 3);
    }

    #[test]
    fn within_variance_accepts_equal_and_scaled_distances() {
        let d = CompositeDistance(100);
        assert!(d.within_variance(CompositeDistance(100), 1));
        assert!(d.within_variance(CompositeDistance(200), 2));
        assert!(!d.within_variance(CompositeDistance(201), 2));
    }

    #[test]
    fn bandwidth_scaling_round_trips_approximately() {
        let scaled = bandwidth_to_scaled(10_000);
        let back = scaled_to_bandwidth(scaled);
        assert!((back as i64 - 10_000).abs() < 5);
    }
}
