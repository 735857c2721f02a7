//! Topology inference over one mesh snapshot
//!
//! Runs the whole pipeline (index, edge reduction, hierarchy, primary links,
//! paths, sibling links) and packages the results for the renderer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

use crate::device::{DeviceId, DeviceType, Nwk, Relationship};
use crate::edge::{Edge, EdgeKey, EdgeQuality};
use crate::hierarchy::Hierarchy;
use crate::index::DeviceIndex;
use crate::path::{resolve_paths, CoordinatorPath};
use crate::primary_link::{PrimaryLink, PrimaryLinks};
use crate::snapshot::{NetworkInfo, Snapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("No coordinator found in snapshot")]
    MissingCoordinator,
}

/// Counts of non-fatal problems encountered during one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Neighbor reports naming a device outside the snapshot
    pub unknown_neighbors: usize,
    /// Usable coordinator routes whose next hop could not be resolved
    pub unresolved_route_hops: usize,
    /// Neighbor reports or next hops naming the reporting device itself
    pub self_references: usize,
    /// Non-numeric or out-of-range fields coerced during ingestion
    pub malformed_numerics: usize,
    /// Devices or neighbor entries dropped for lack of an identity
    pub missing_identities: usize,
    /// Device entries sharing an identity with an earlier entry
    pub duplicate_devices: usize,
    /// Parent cycles broken while building the hierarchy
    pub broken_cycles: usize,
    /// Paths that stopped before reaching the coordinator
    pub truncated_paths: usize,
}

impl Diagnostics {
    /// Total number of recorded problems
    pub fn total(&self) -> usize {
        self.unknown_neighbors
            + self.unresolved_route_hops
            + self.self_references
            + self.malformed_numerics
            + self.missing_identities
            + self.duplicate_devices
            + self.broken_cycles
            + self.truncated_paths
    }
}

/// An auxiliary router-to-router link for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingLink {
    pub a: DeviceId,
    pub b: DeviceId,
    pub lqi: u8,
}

/// A device as presented to the renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: DeviceId,
    pub name: String,
    pub nwk: Option<Nwk>,
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// The device's own reported link quality
    pub lqi: Option<u8>,
    pub available: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub device_reg_id: Option<String>,
    pub is_coordinator: bool,
    /// Parent in the hierarchy (layout tree)
    pub parent: Option<DeviceId>,
    /// Designated uplink (path/link rendering)
    pub primary_link: Option<PrimaryLink>,
    pub path_to_coordinator: CoordinatorPath,
}

/// Inferred topology of one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub export_timestamp: Option<String>,
    pub network: NetworkInfo,
    pub coordinator: DeviceId,
    /// Nodes in snapshot order
    pub nodes: Vec<TopologyNode>,
    pub hierarchy: Hierarchy,
    pub primary_links: PrimaryLinks,
    pub edges: Vec<Edge>,
    pub sibling_links: Vec<SiblingLink>,
    pub diagnostics: Diagnostics,
}

impl Topology {
    /// Infer the topology of a snapshot.
    ///
    /// Fails only when the snapshot has no coordinator.
    pub fn infer(snapshot: &Snapshot) -> Result<Self, TopologyError> {
        let index = match DeviceIndex::new(&snapshot.devices) {
            Ok(index) => index,
            Err(e) => {
                warn!(devices = snapshot.devices.len(), "Cannot infer topology: {}", e);
                return Err(e);
            }
        };

        let edges = EdgeQuality::reduce(&index);
        let hierarchy = Hierarchy::build(&index, &edges);
        let primary_links = PrimaryLinks::resolve(&index);
        let mut paths = resolve_paths(&index, &primary_links);
        let sibling_links = sibling_links(&index, &primary_links);

        let mut diagnostics = reference_diagnostics(&index);
        diagnostics.malformed_numerics = snapshot.stats.malformed_numerics;
        diagnostics.missing_identities =
            snapshot.stats.devices_without_ieee + snapshot.stats.neighbors_without_ieee;
        diagnostics.duplicate_devices = index.duplicates();
        diagnostics.broken_cycles = hierarchy.broken_cycles();
        diagnostics.truncated_paths = paths.values().filter(|p| !p.complete).count();

        let nodes = index
            .iter()
            .map(|(slot, device)| TopologyNode {
                id: device.ieee.clone(),
                name: device.name.clone(),
                nwk: device.nwk,
                device_type: index.device_type(slot),
                manufacturer: device.manufacturer.clone(),
                model: device.model.clone(),
                lqi: device.lqi,
                available: device.available,
                last_seen: device.last_seen,
                device_reg_id: device.device_reg_id.clone(),
                is_coordinator: slot == index.coordinator(),
                parent: hierarchy.parent_of(&device.ieee).cloned(),
                primary_link: primary_links.get(&device.ieee).cloned(),
                path_to_coordinator: paths.remove(&device.ieee).unwrap_or_default(),
            })
            .collect();

        let topology = Self {
            export_timestamp: snapshot.export_timestamp.clone(),
            network: snapshot.network.clone(),
            coordinator: index.device(index.coordinator()).ieee.clone(),
            nodes,
            hierarchy,
            primary_links,
            edges: edges.edges(),
            sibling_links,
            diagnostics,
        };

        info!(
            devices = topology.nodes.len(),
            edges = topology.edges.len(),
            issues = topology.diagnostics.total(),
            "Topology inferred"
        );
        Ok(topology)
    }

    /// Get a node by ID
    pub fn get_node(&self, id: &DeviceId) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Get the coordinator node
    pub fn root(&self) -> Option<&TopologyNode> {
        self.get_node(&self.coordinator)
    }

    /// Hierarchy children of a node
    pub fn children(&self, id: &DeviceId) -> Vec<&TopologyNode> {
        self.hierarchy
            .children_of(id)
            .iter()
            .filter_map(|c| self.get_node(&c.id))
            .collect()
    }

    /// Get topology as pretty or compact JSON
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

/// Router/coordinator Sibling reports between relays, one per pair.
///
/// Pairs already joined by a primary link are left out.
fn sibling_links(index: &DeviceIndex<'_>, links: &PrimaryLinks) -> Vec<SiblingLink> {
    let primary: BTreeSet<EdgeKey> = links
        .iter()
        .map(|(id, link)| EdgeKey::new(id, &link.target))
        .collect();

    let mut seen = BTreeSet::new();
    let mut siblings = Vec::new();
    for (slot, device) in index.iter() {
        if !index.is_relay(slot) {
            continue;
        }
        for neighbor in &device.neighbors {
            if neighbor.relationship != Relationship::Sibling {
                continue;
            }
            let Some(other) = index.slot_of(&neighbor.ieee) else {
                continue;
            };
            if other == slot || !index.is_relay(other) {
                continue;
            }
            let key = EdgeKey::new(&device.ieee, &neighbor.ieee);
            if primary.contains(&key) || !seen.insert(key) {
                continue;
            }
            siblings.push(SiblingLink {
                a: device.ieee.clone(),
                b: neighbor.ieee.clone(),
                lqi: neighbor.lqi,
            });
        }
    }
    siblings
}

/// Count references that the engine had to skip
fn reference_diagnostics(index: &DeviceIndex<'_>) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    for (slot, device) in index.iter() {
        for neighbor in &device.neighbors {
            match index.slot_of(&neighbor.ieee) {
                None => diagnostics.unknown_neighbors += 1,
                Some(other) if other == slot => diagnostics.self_references += 1,
                Some(_) => {}
            }
        }
        if slot == index.coordinator() {
            continue;
        }
        for route in device.routes.iter().filter(|r| r.is_coordinator_route()) {
            match route.next_hop.and_then(|nwk| index.slot_of_nwk(nwk)) {
                None => diagnostics.unresolved_route_hops += 1,
                Some(other) if other == slot => diagnostics.self_references += 1,
                Some(_) => {}
            }
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, NeighborRecord, RouteRecord, RouteStatus};
    use crate::primary_link::LinkSource;

    fn id(s: &str) -> DeviceId {
        DeviceId::from_ieee(s)
    }

    fn mesh() -> Vec<Device> {
        vec![
            Device::new("C", DeviceType::Coordinator)
                .with_nwk(0)
                .with_neighbor(NeighborRecord::new("R1", Relationship::Child, 210))
                .with_neighbor(NeighborRecord::new("R2", Relationship::Child, 120)),
            Device::new("R1", DeviceType::Router)
                .with_nwk(0x1111)
                .with_neighbor(NeighborRecord::new("C", Relationship::Parent, 200))
                .with_neighbor(NeighborRecord::new("R2", Relationship::Sibling, 140))
                .with_neighbor(NeighborRecord::new("E1", Relationship::Child, 160))
                .with_neighbor(NeighborRecord::new("outside", Relationship::Sibling, 30)),
            Device::new("R2", DeviceType::Router)
                .with_nwk(0x2222)
                .with_neighbor(NeighborRecord::new("R1", Relationship::Sibling, 150))
                .with_route(RouteRecord {
                    dest_nwk: Some(Nwk(0)),
                    next_hop: Some(Nwk(0x1111)),
                    status: RouteStatus::Active,
                })
                .with_route(RouteRecord {
                    dest_nwk: Some(Nwk(0)),
                    next_hop: Some(Nwk(0x9999)),
                    status: RouteStatus::Active,
                }),
            Device::new("E1", DeviceType::EndDevice)
                .with_nwk(0x3333)
                .with_neighbor(NeighborRecord::new("R1", Relationship::Parent, 155)),
            Device::new("X", DeviceType::EndDevice),
        ]
    }

    #[test]
    fn test_infer_full_pipeline() {
        let snapshot = Snapshot::from_devices(mesh());
        let topology = Topology::infer(&snapshot).unwrap();

        assert_eq!(topology.coordinator, id("C"));
        assert_eq!(topology.root().unwrap().id, id("C"));
        assert!(topology.root().unwrap().is_coordinator);
        assert_eq!(topology.nodes.len(), 5);

        let r2 = topology.get_node(&id("R2")).unwrap();
        let link = r2.primary_link.as_ref().unwrap();
        assert_eq!(link.target, id("R1"));
        assert_eq!(link.source, LinkSource::Route);
        assert_eq!(link.lqi, Some(150));
        // hierarchy and primary link disagree on purpose: C reported R2 as child
        assert_eq!(r2.parent, Some(id("C")));

        let e1 = topology.get_node(&id("E1")).unwrap();
        let hops: Vec<&str> = e1.path_to_coordinator.hops.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(hops, vec!["R1", "C"]);
        assert!(e1.path_to_coordinator.complete);

        let x = topology.get_node(&id("X")).unwrap();
        assert_eq!(x.primary_link.as_ref().unwrap().source, LinkSource::Fallback);
        assert_eq!(x.parent, Some(id("C")));

        let children: Vec<&str> = topology
            .children(&id("C"))
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(children, vec!["R1", "R2", "X"]);
    }

    #[test]
    fn test_sibling_links_skip_primary_pairs() {
        let mut devices = mesh();
        devices.push(
            Device::new("R3", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("C", Relationship::Parent, 90))
                .with_neighbor(NeighborRecord::new("R1", Relationship::Sibling, 70)),
        );
        devices[1]
            .neighbors
            .push(NeighborRecord::new("R3", Relationship::Sibling, 75));
        let topology = Topology::infer(&Snapshot::from_devices(devices)).unwrap();

        // R1-R2 is R2's primary route; only R1-R3 remains, reported first by R1
        assert_eq!(
            topology.sibling_links,
            vec![SiblingLink { a: id("R1"), b: id("R3"), lqi: 75 }]
        );
    }

    #[test]
    fn test_diagnostics() {
        let mut devices = mesh();
        devices.push(Device::new("R1", DeviceType::Router));
        devices.push(
            Device::new("S", DeviceType::Router)
                .with_neighbor(NeighborRecord::new("S", Relationship::Unknown, 1)),
        );
        let topology = Topology::infer(&Snapshot::from_devices(devices)).unwrap();
        let d = topology.diagnostics;

        assert_eq!(d.unknown_neighbors, 1);
        assert_eq!(d.unresolved_route_hops, 1);
        assert_eq!(d.self_references, 1);
        assert_eq!(d.duplicate_devices, 1);
        assert_eq!(d.broken_cycles, 0);
        assert_eq!(d.truncated_paths, 0);
        assert_eq!(d.total(), 4);
    }

    #[test]
    fn test_missing_coordinator_is_distinct_from_empty() {
        let snapshot = Snapshot::from_devices(vec![Device::new("R", DeviceType::Router)]);
        assert_eq!(
            Topology::infer(&snapshot).unwrap_err(),
            TopologyError::MissingCoordinator
        );

        let only_coordinator = Snapshot::from_devices(vec![Device::new("C", DeviceType::Coordinator)]);
        let topology = Topology::infer(&only_coordinator).unwrap();
        assert_eq!(topology.nodes.len(), 1);
        assert!(topology.hierarchy.children.is_empty());
        assert!(topology.primary_links.is_empty());
    }

    #[test]
    fn test_infer_is_byte_identical_across_runs() {
        let snapshot = Snapshot::from_devices(mesh());
        let first = Topology::infer(&snapshot).unwrap().to_json(false).unwrap();
        let second = Topology::infer(&snapshot).unwrap().to_json(false).unwrap();
        assert_eq!(first, second);
    }
}
