//! Primary link resolution: each device's single uplink toward the coordinator
//!
//! Evidence is tried in strict priority order and the first match wins:
//! 1. a usable route to network address 0 (`route`)
//! 2. the device's own Parent neighbor report (`parent`)
//! 3. a relay reporting the device as its Child (`neighbor`)
//! 4. the device's strongest suitable neighbor (`neighbor`)
//! 5. the coordinator itself, quality unknown (`fallback`)
//!
//! This is deliberately independent of [`crate::hierarchy`]; the two use
//! different evidence and may disagree for the same device.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::device::{Device, DeviceId, DeviceType, Relationship};
use crate::index::{DeviceIndex, Slot};
use crate::topology::TopologyError;

/// Which cascade rule produced a primary link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSource {
    Route,
    Parent,
    Neighbor,
    Fallback,
}

impl fmt::Display for LinkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Route => "route",
            Self::Parent => "parent",
            Self::Neighbor => "neighbor",
            Self::Fallback => "fallback",
        };
        write!(f, "{}", name)
    }
}

/// A device's designated uplink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryLink {
    pub target: DeviceId,
    /// `None` only for fallback links
    pub lqi: Option<u8>,
    pub source: LinkSource,
}

/// Primary links for every non-coordinator device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryLinks {
    links: BTreeMap<DeviceId, PrimaryLink>,
}

impl PrimaryLinks {
    /// Resolve primary links for a device list
    pub fn from_devices(devices: &[Device]) -> Result<Self, TopologyError> {
        let index = DeviceIndex::new(devices)?;
        Ok(Self::resolve(&index))
    }

    /// Resolve primary links over an existing index
    pub fn resolve(index: &DeviceIndex<'_>) -> Self {
        let coordinator = index.coordinator();
        let inbound_children = best_inbound_child_reports(index);

        let mut links = BTreeMap::new();
        for (slot, device) in index.iter() {
            if slot == coordinator {
                continue;
            }

            let (target, lqi, source) = route_link(index, slot, device)
                .map(|(t, lqi)| (t, Some(lqi), LinkSource::Route))
                .or_else(|| {
                    parent_link(index, slot, device).map(|(t, lqi)| (t, Some(lqi), LinkSource::Parent))
                })
                .or_else(|| {
                    inbound_children[slot].map(|(t, lqi)| (t, Some(lqi), LinkSource::Neighbor))
                })
                .or_else(|| {
                    strongest_neighbor(index, slot, device)
                        .map(|(t, lqi)| (t, Some(lqi), LinkSource::Neighbor))
                })
                .unwrap_or((coordinator, None, LinkSource::Fallback));

            debug!(
                ieee = %device.ieee,
                uplink = %index.device(target).ieee,
                %source,
                "Resolved primary link"
            );
            links.insert(
                device.ieee.clone(),
                PrimaryLink {
                    target: index.device(target).ieee.clone(),
                    lqi,
                    source,
                },
            );
        }

        Self { links }
    }

    pub fn get(&self, id: &DeviceId) -> Option<&PrimaryLink> {
        self.links.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &PrimaryLink)> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of links produced by each cascade rule
    pub fn count_by_source(&self) -> BTreeMap<LinkSource, usize> {
        let mut counts = BTreeMap::new();
        for link in self.links.values() {
            *counts.entry(link.source).or_insert(0) += 1;
        }
        counts
    }
}

/// Rule 1: first usable route to the coordinator whose next hop is a known device.
///
/// Quality comes from the device's own neighbor entry for the next hop,
/// matched by network address or identity; 0 if there is none.
fn route_link(index: &DeviceIndex<'_>, slot: Slot, device: &Device) -> Option<(Slot, u8)> {
    device
        .routes
        .iter()
        .filter(|route| route.is_coordinator_route())
        .find_map(|route| {
            let next_hop = route.next_hop?;
            let target = index.slot_of_nwk(next_hop)?;
            if target == slot {
                return None;
            }
            let target_id = &index.device(target).ieee;
            let lqi = device
                .neighbors
                .iter()
                .find(|n| n.nwk == Some(next_hop) || &n.ieee == target_id)
                .map_or(0, |n| n.lqi);
            Some((target, lqi))
        })
}

/// Rule 2: first Parent report naming a known device
fn parent_link(index: &DeviceIndex<'_>, slot: Slot, device: &Device) -> Option<(Slot, u8)> {
    device
        .neighbors
        .iter()
        .filter(|n| n.relationship == Relationship::Parent)
        .find_map(|n| {
            index
                .slot_of(&n.ieee)
                .filter(|&target| target != slot)
                .map(|target| (target, n.lqi))
        })
}

/// Rule 3 input: for each device, the strongest relay reporting it as a Child.
///
/// Scans reporters in caller order; the first report wins ties.
fn best_inbound_child_reports(index: &DeviceIndex<'_>) -> Vec<Option<(Slot, u8)>> {
    let mut best: Vec<Option<(Slot, u8)>> = vec![None; index.len()];
    for (reporter, device) in index.iter() {
        if !index.is_relay(reporter) {
            continue;
        }
        for neighbor in &device.neighbors {
            if neighbor.relationship != Relationship::Child {
                continue;
            }
            let Some(child) = index.slot_of(&neighbor.ieee) else {
                continue;
            };
            if child == reporter {
                continue;
            }
            if best[child].map_or(true, |(_, lqi)| neighbor.lqi > lqi) {
                best[child] = Some((reporter, neighbor.lqi));
            }
        }
    }
    best
}

/// Rule 4: the device's own strongest known neighbor.
///
/// End devices only consider routers and the coordinator.
fn strongest_neighbor(index: &DeviceIndex<'_>, slot: Slot, device: &Device) -> Option<(Slot, u8)> {
    let relays_only = index.device_type(slot) == DeviceType::EndDevice;
    let mut best: Option<(Slot, u8)> = None;
    for neighbor in &device.neighbors {
        let Some(target) = index.slot_of(&neighbor.ieee) else {
            continue;
        };
        if target == slot || (relays_only && !index.is_relay(target)) {
            continue;
        }
        if best.map_or(true, |(_, lqi)| neighbor.lqi > lqi) {
            best = Some((target, neighbor.lqi));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{NeighborRecord, Nwk, RouteRecord, RouteStatus};

    fn id(s: &str) -> DeviceId {
        DeviceId::from_ieee(s)
    }

    fn link(links: &PrimaryLinks, device: &str) -> (String, Option<u8>, LinkSource) {
        let l = links.get(&id(device)).unwrap();
        (l.target.to_string(), l.lqi, l.source)
    }

    fn route(dest: u16, next_hop: u16, status: &str) -> RouteRecord {
        RouteRecord {
            dest_nwk: Some(Nwk(dest)),
            next_hop: Some(Nwk(next_hop)),
            status: RouteStatus::from_zha(status),
        }
    }

    #[test]
    fn test_parent_chain() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator),
            Device::new("R", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("C", Relationship::Parent, 200)),
            Device::new("E", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("R", Relationship::Parent, 150)),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        assert_eq!(links.len(), 2);
        assert!(links.get(&id("C")).is_none());
        assert_eq!(link(&links, "R"), ("C".to_string(), Some(200), LinkSource::Parent));
        assert_eq!(link(&links, "E"), ("R".to_string(), Some(150), LinkSource::Parent));
    }

    #[test]
    fn test_route_beats_parent_report() {
        let mut r2_report = NeighborRecord::new("R2", Relationship::Sibling, 90);
        r2_report.nwk = Some(Nwk(0x2222));
        let devices = vec![
            Device::new("C", DeviceType::Coordinator).with_nwk(0),
            Device::new("R1", DeviceType::Router).with_nwk(0x1111),
            Device::new("R2", DeviceType::Router).with_nwk(0x2222),
            Device::new("D", DeviceType::Router)
                .with_nwk(0x3333)
                .with_neighbor(NeighborRecord::new("R1", Relationship::Parent, 230))
                .with_neighbor(r2_report)
                .with_route(route(0, 0x2222, "Active")),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        assert_eq!(link(&links, "D"), ("R2".to_string(), Some(90), LinkSource::Route));
    }

    #[test]
    fn test_route_rules() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator).with_nwk(0),
            Device::new("R", DeviceType::Router).with_nwk(0x10),
            // inactive route and unknown next hop are skipped, direct hop to coordinator used
            Device::new("A", DeviceType::Router)
                .with_route(route(0, 0x10, "Inactive"))
                .with_route(route(0, 0x77, "Active"))
                .with_route(route(0x10, 0x10, "Active"))
                .with_route(route(0, 0, "Validation_Underway")),
            // matching neighbor entry found by identity; none for coordinator on A
            Device::new("B", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("R", Relationship::Unknown, 45))
                .with_route(route(0, 0x10, "Active")),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        assert_eq!(link(&links, "A"), ("C".to_string(), Some(0), LinkSource::Route));
        assert_eq!(link(&links, "B"), ("R".to_string(), Some(45), LinkSource::Route));
    }

    #[test]
    fn test_inbound_child_report() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator)
                .with_neighbor(NeighborRecord::new("E", Relationship::Child, 60)),
            Device::new("R1", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("E", Relationship::Child, 140)),
            Device::new("R2", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("E", Relationship::Child, 140)),
            Device::new("E2", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("E", Relationship::Child, 250)),
            Device::new("E", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("R2", Relationship::Sibling, 200)),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        // end devices cannot parent; first of equal reports wins
        assert_eq!(link(&links, "E"), ("R1".to_string(), Some(140), LinkSource::Neighbor));
    }

    #[test]
    fn test_strongest_own_neighbor() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator),
            Device::new("R", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("E1", Relationship::Unknown, 250))
                .with_neighbor(NeighborRecord::new("C", Relationship::Sibling, 30)),
            Device::new("E1", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("E2", Relationship::Sibling, 240))
                .with_neighbor(NeighborRecord::new("R", Relationship::Unknown, 0))
                .with_neighbor(NeighborRecord::new("ghost", Relationship::Unknown, 255)),
            Device::new("E2", DeviceType::EndDevice)
                .with_neighbor(NeighborRecord::new("E1", Relationship::Sibling, 240)),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        // routers take any neighbor
        assert_eq!(link(&links, "R"), ("E1".to_string(), Some(250), LinkSource::Neighbor));
        // end devices only relays, zero quality still counts as evidence
        assert_eq!(link(&links, "E1"), ("R".to_string(), Some(0), LinkSource::Neighbor));
        assert_eq!(link(&links, "E2"), ("C".to_string(), None, LinkSource::Fallback));
    }

    #[test]
    fn test_fallback_without_evidence() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator),
            Device::new("X", DeviceType::EndDevice),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        assert_eq!(link(&links, "X"), ("C".to_string(), None, LinkSource::Fallback));
        let counts = links.count_by_source();
        assert_eq!(counts.get(&LinkSource::Fallback), Some(&1));
    }

    #[test]
    fn test_self_references_are_ignored() {
        let devices = vec![
            Device::new("C", DeviceType::Coordinator),
            Device::new("S", DeviceType::Router)
                .with_nwk(0x42)
                .with_neighbor(NeighborRecord::new("S", Relationship::Parent, 255))
                .with_route(route(0, 0x42, "Active")),
        ];
        let links = PrimaryLinks::from_devices(&devices).unwrap();

        assert_eq!(link(&links, "S"), ("C".to_string(), None, LinkSource::Fallback));
    }

    #[test]
    fn test_source_display_matches_json() {
        for source in [
            LinkSource::Route,
            LinkSource::Parent,
            LinkSource::Neighbor,
            LinkSource::Fallback,
        ] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{}\"", source));
        }
    }

    #[test]
    fn test_missing_coordinator() {
        let devices = vec![Device::new("E", DeviceType::EndDevice)];
        assert!(matches!(
            PrimaryLinks::from_devices(&devices),
            Err(TopologyError::MissingCoordinator)
        ));
    }
}
