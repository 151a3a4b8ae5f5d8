// ── Route resolution ──
//
// Weighted shortest path from any device back to the coordinator over a
// single snapshot. Pure function of its input: the same snapshot always
// yields the same route.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use serde::Serialize;

use crate::model::{DeviceId, Snapshot};

/// Scale for the inverse-quality cost: a perfect link (LQI 255) costs 255,
/// an LQI of 1 costs 65 025.
const COST_SCALE: u32 = 255 * 255;

/// Path from a device to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Ordered from the requested device to the coordinator, inclusive.
    /// Empty when unreachable.
    pub hops: Vec<DeviceId>,
    pub reachable: bool,
    /// Sum of per-link costs along `hops`.
    pub cost: u32,
}

impl Route {
    fn unreachable() -> Self {
        Self {
            hops: Vec::new(),
            reachable: false,
            cost: 0,
        }
    }

    /// Number of radio hops (links) on the path.
    pub fn hop_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }
}

/// Cost of traversing a link of the given quality, `None` if unusable.
pub fn link_cost(quality: u8) -> Option<u32> {
    (quality > 0).then(|| COST_SCALE / u32::from(quality))
}

/// Resolve the cheapest path from `target` to the snapshot's coordinator.
///
/// Links are usable in both directions; when both ends report the link,
/// the better quality wins. Among equal-cost paths the predecessor with the
/// smallest identity is preferred.
pub fn resolve_route(snapshot: &Snapshot, target: &DeviceId) -> Route {
    if !snapshot.contains(target) {
        return Route::unreachable();
    }
    let coordinator = snapshot.coordinator_id();
    if target == coordinator {
        return Route {
            hops: vec![target.clone()],
            reachable: true,
            cost: 0,
        };
    }

    let graph = adjacency(snapshot);

    // Search outward from the coordinator; `previous` then points each
    // settled device one hop closer to it.
    let mut distance: HashMap<&DeviceId, u32> = HashMap::new();
    let mut previous: HashMap<&DeviceId, &DeviceId> = HashMap::new();
    let mut heap = BinaryHeap::new();

    distance.insert(coordinator, 0);
    heap.push(Reverse((0u32, coordinator)));

    while let Some(Reverse((cost, node))) = heap.pop() {
        if distance.get(node).is_some_and(|&best| cost > best) {
            continue;
        }
        if node == target {
            break;
        }
        let Some(edges) = graph.get(node) else {
            continue;
        };
        for (&next, &weight) in edges {
            let candidate = cost.saturating_add(weight);
            match distance.get(next) {
                Some(&known) if candidate > known => {}
                Some(&known) if candidate == known => {
                    if previous.get(next).is_some_and(|&p| node < p) {
                        previous.insert(next, node);
                    }
                }
                _ => {
                    distance.insert(next, candidate);
                    previous.insert(next, node);
                    heap.push(Reverse((candidate, next)));
                }
            }
        }
    }

    let Some(&cost) = distance.get(target) else {
        return Route::unreachable();
    };

    let mut hops = vec![target.clone()];
    let mut cursor = target;
    while cursor != coordinator {
        let Some(&hop) = previous.get(cursor) else {
            return Route::unreachable();
        };
        hops.push(hop.clone());
        cursor = hop;
    }

    Route {
        hops,
        reachable: true,
        cost,
    }
}

/// Undirected adjacency with the cheapest cost per device pair.
fn adjacency(snapshot: &Snapshot) -> BTreeMap<&DeviceId, BTreeMap<&DeviceId, u32>> {
    let mut graph: BTreeMap<&DeviceId, BTreeMap<&DeviceId, u32>> = BTreeMap::new();
    for link in snapshot.links() {
        if link.source == link.target {
            continue;
        }
        let Some(cost) = link_cost(link.quality) else {
            continue;
        };
        for (from, to) in [(&link.source, &link.target), (&link.target, &link.source)] {
            graph
                .entry(from)
                .or_default()
                .entry(to)
                .and_modify(|c| *c = (*c).min(cost))
                .or_insert(cost);
        }
    }
    graph
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Device, DeviceKind};

    const COORD: &str = "0x0000";

    fn snapshot(devices: Vec<Device>) -> Snapshot {
        let mut map = BTreeMap::new();
        map.insert(
            DeviceId::new(COORD),
            Arc::new(Device::new(COORD, "coord", DeviceKind::Coordinator)),
        );
        for d in devices {
            map.insert(d.id.clone(), Arc::new(d));
        }
        Snapshot::build(1, DeviceId::new(COORD), map).unwrap()
    }

    fn ids(hops: &[&str]) -> Vec<DeviceId> {
        hops.iter().map(|h| DeviceId::new(*h)).collect()
    }

    #[test]
    fn coordinator_routes_to_itself() {
        let snap = snapshot(vec![]);
        let route = resolve_route(&snap, &DeviceId::new(COORD));
        assert_eq!(route.hops, ids(&[COORD]));
        assert!(route.reachable);
        assert_eq!(route.hop_count(), 0);
    }

    #[test]
    fn unknown_device_is_unreachable() {
        let snap = snapshot(vec![]);
        let route = resolve_route(&snap, &DeviceId::new("0xdead"));
        assert!(!route.reachable);
        assert!(route.hops.is_empty());
    }

    #[test]
    fn isolated_device_is_unreachable() {
        let snap = snapshot(vec![
            Device::new("0x1111", "island", DeviceKind::Router).with_neighbor("0x2222", 200),
            Device::new("0x2222", "island peer", DeviceKind::EndDevice),
        ]);
        let route = resolve_route(&snap, &DeviceId::new("0x1111"));
        assert!(!route.reachable);
        assert!(route.hops.is_empty());
    }

    #[test]
    fn direct_link_to_coordinator() {
        let snap = snapshot(vec![
            Device::new("0x1234", "lamp", DeviceKind::Router).with_neighbor(COORD, 80),
        ]);
        let route = resolve_route(&snap, &DeviceId::new("0x1234"));
        assert_eq!(route.hops, ids(&["0x1234", COORD]));
        assert!(route.reachable);
        assert_eq!(route.cost, link_cost(80).unwrap());
    }

    #[test]
    fn link_reported_by_coordinator_side_is_usable() {
        let mut coord = Device::new(COORD, "coord", DeviceKind::Coordinator);
        coord.neighbors.insert(DeviceId::new("0x1234"), 120);
        let mut map = BTreeMap::new();
        map.insert(coord.id.clone(), Arc::new(coord));
        let lamp = Device::new("0x1234", "lamp", DeviceKind::Router);
        map.insert(lamp.id.clone(), Arc::new(lamp));
        let snap = Snapshot::build(1, DeviceId::new(COORD), map).unwrap();

        let route = resolve_route(&snap, &DeviceId::new("0x1234"));
        assert_eq!(route.hops, ids(&["0x1234", COORD]));
    }

    #[test]
    fn prefers_two_strong_hops_over_one_weak_hop() {
        let snap = snapshot(vec![
            Device::new("0xaaaa", "sensor", DeviceKind::EndDevice)
                .with_neighbor(COORD, 5)
                .with_neighbor("0xbbbb", 250),
            Device::new("0xbbbb", "router", DeviceKind::Router).with_neighbor(COORD, 250),
        ]);
        let route = resolve_route(&snap, &DeviceId::new("0xaaaa"));
        assert_eq!(route.hops, ids(&["0xaaaa", "0xbbbb", COORD]));
    }

    #[test]
    fn zero_quality_links_are_ignored() {
        let snap = snapshot(vec![
            Device::new("0x1234", "lamp", DeviceKind::Router).with_neighbor(COORD, 0),
        ]);
        assert!(!resolve_route(&snap, &DeviceId::new("0x1234")).reachable);
    }

    #[test]
    fn ties_break_on_smaller_identity() {
        let snap = snapshot(vec![
            Device::new("0x9999", "leaf", DeviceKind::EndDevice)
                .with_neighbor("0x2222", 100)
                .with_neighbor("0x1111", 100),
            Device::new("0x1111", "r1", DeviceKind::Router).with_neighbor(COORD, 100),
            Device::new("0x2222", "r2", DeviceKind::Router).with_neighbor(COORD, 100),
        ]);
        for _ in 0..8 {
            let route = resolve_route(&snap, &DeviceId::new("0x9999"));
            assert_eq!(route.hops, ids(&["0x9999", "0x1111", COORD]));
        }
    }
}
