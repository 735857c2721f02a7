//! Hierarchy builder: one parent per device, rooted at the coordinator
//!
//! Placement runs in three tiers and every device is frozen once placed:
//! 1. Routers, from Parent/Child relationship reports (best lqi wins)
//! 2. End devices, from Child reports, else their strongest relay edge
//! 3. Anything left over hangs directly off the coordinator
//!
//! Relationship reports can contradict each other, so a final pass walks
//! each parent chain and re-roots any device that closes a cycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::device::{Device, DeviceId, DeviceType, Relationship};
use crate::edge::EdgeQuality;
use crate::index::{DeviceIndex, Slot};
use crate::topology::TopologyError;

/// How a device ended up under its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// A Parent or Child relationship report
    Reported,
    /// The strongest edge to a router or the coordinator
    StrongestEdge,
    /// No evidence for this tier; attached to the coordinator
    Coordinator,
    /// Not a router or end device; attached to the coordinator
    Orphan,
    /// Re-attached to the coordinator to break a parent cycle
    CycleBreak,
}

/// A child entry under a parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub id: DeviceId,
    /// Link quality to the parent; `None` when unknown or zero
    pub lqi: Option<u8>,
    pub placement: Placement,
}

/// Parent/child tree covering every device exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub coordinator: DeviceId,
    /// Children per parent, routers first then by descending link quality
    pub children: BTreeMap<DeviceId, Vec<ChildLink>>,
    #[serde(skip)]
    parents: BTreeMap<DeviceId, DeviceId>,
    #[serde(skip)]
    broken_cycles: usize,
}

#[derive(Debug, Clone, Copy)]
struct Assignment {
    parent: Slot,
    lqi: Option<u8>,
    placement: Placement,
}

/// Zero quality carries no information
fn known_quality(lqi: u8) -> Option<u8> {
    (lqi > 0).then_some(lqi)
}

/// Keep the first candidate unless a later one is strictly better
fn offer(best: &mut Option<(Slot, u8)>, parent: Slot, lqi: u8) {
    if best.map_or(true, |(_, current)| lqi > current) {
        *best = Some((parent, lqi));
    }
}

impl Hierarchy {
    /// Build the hierarchy for a device list
    pub fn from_devices(devices: &[Device]) -> Result<Self, TopologyError> {
        let index = DeviceIndex::new(devices)?;
        let edges = EdgeQuality::reduce(&index);
        Ok(Self::build(&index, &edges))
    }

    /// Build the hierarchy over an existing index and reduced edge set
    pub fn build(index: &DeviceIndex<'_>, edges: &EdgeQuality) -> Self {
        let coordinator = index.coordinator();
        let coordinator_id = &index.device(coordinator).ieee;
        let mut assigned: Vec<Option<Assignment>> = vec![None; index.len()];
        let mut order: Vec<Slot> = Vec::with_capacity(index.len());

        // Candidate parents from relationship reports
        let mut router_candidates: Vec<Option<(Slot, u8)>> = vec![None; index.len()];
        let mut end_device_candidates: Vec<Option<(Slot, u8)>> = vec![None; index.len()];
        for (observer, device) in index.iter() {
            for neighbor in &device.neighbors {
                let Some(other) = index.slot_of(&neighbor.ieee) else {
                    continue;
                };
                if other == observer {
                    continue;
                }
                match neighbor.relationship {
                    Relationship::Parent if index.device_type(observer) == DeviceType::Router => {
                        offer(&mut router_candidates[observer], other, neighbor.lqi);
                    }
                    Relationship::Child if index.is_relay(observer) => {
                        match index.device_type(other) {
                            DeviceType::Router => {
                                offer(&mut router_candidates[other], observer, neighbor.lqi)
                            }
                            DeviceType::EndDevice => {
                                offer(&mut end_device_candidates[other], observer, neighbor.lqi)
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }

        // Tier 1: routers
        for (slot, device) in index.iter() {
            if index.device_type(slot) != DeviceType::Router {
                continue;
            }
            let assignment = match router_candidates[slot] {
                Some((parent, lqi)) => Assignment {
                    parent,
                    lqi: known_quality(lqi),
                    placement: Placement::Reported,
                },
                None => Assignment {
                    parent: coordinator,
                    lqi: known_quality(edges.between(&device.ieee, coordinator_id)),
                    placement: Placement::Coordinator,
                },
            };
            assigned[slot] = Some(assignment);
            order.push(slot);
        }

        // Tier 2: end devices
        for (slot, device) in index.iter() {
            if index.device_type(slot) != DeviceType::EndDevice || assigned[slot].is_some() {
                continue;
            }
            let assignment = match end_device_candidates[slot] {
                Some((parent, lqi)) => Assignment {
                    parent,
                    lqi: known_quality(lqi),
                    placement: Placement::Reported,
                },
                None => {
                    let mut best: Option<(Slot, u8)> = None;
                    for (other, other_device) in index.iter() {
                        if other == slot || !index.is_relay(other) {
                            continue;
                        }
                        let lqi = edges.between(&device.ieee, &other_device.ieee);
                        if lqi > best.map_or(0, |(_, q)| q) {
                            best = Some((other, lqi));
                        }
                    }
                    match best {
                        Some((parent, lqi)) => Assignment {
                            parent,
                            lqi: Some(lqi),
                            placement: Placement::StrongestEdge,
                        },
                        None => Assignment {
                            parent: coordinator,
                            lqi: None,
                            placement: Placement::Coordinator,
                        },
                    }
                }
            };
            assigned[slot] = Some(assignment);
            order.push(slot);
        }

        // Tier 3: orphans
        for (slot, device) in index.iter() {
            if slot == coordinator || assigned[slot].is_some() {
                continue;
            }
            debug!(ieee = %device.ieee, "Attaching orphan to coordinator");
            assigned[slot] = Some(Assignment {
                parent: coordinator,
                lqi: None,
                placement: Placement::Orphan,
            });
            order.push(slot);
        }

        let broken_cycles = break_cycles(index, edges, &mut assigned);

        let mut children: BTreeMap<DeviceId, Vec<(Slot, ChildLink)>> = BTreeMap::new();
        let mut parents = BTreeMap::new();
        for slot in order {
            let Some(assignment) = assigned[slot] else {
                continue;
            };
            let child = &index.device(slot).ieee;
            let parent = &index.device(assignment.parent).ieee;
            parents.insert(child.clone(), parent.clone());
            children.entry(parent.clone()).or_default().push((
                slot,
                ChildLink {
                    id: child.clone(),
                    lqi: assignment.lqi,
                    placement: assignment.placement,
                },
            ));
        }

        let children = children
            .into_iter()
            .map(|(parent, mut links)| {
                // Stable sort: equal keys keep assignment order
                links.sort_by_key(|(slot, link)| {
                    (
                        index.device_type(*slot) != DeviceType::Router,
                        std::cmp::Reverse(link.lqi.unwrap_or(0)),
                    )
                });
                (parent, links.into_iter().map(|(_, link)| link).collect())
            })
            .collect();

        Self {
            coordinator: coordinator_id.clone(),
            children,
            parents,
            broken_cycles,
        }
    }

    /// Children of `id`, empty for leaves and unknown devices
    pub fn children_of(&self, id: &DeviceId) -> &[ChildLink] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent of `id`; `None` for the coordinator and unknown devices
    pub fn parent_of(&self, id: &DeviceId) -> Option<&DeviceId> {
        self.parents.get(id)
    }

    /// Parent cycles that had to be broken while building
    pub fn broken_cycles(&self) -> usize {
        self.broken_cycles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Unvisited,
    OnWalk,
    Rooted,
}

/// Re-root every device whose parent edge closes a cycle.
///
/// Each walk follows parents until it meets a node already known to reach the
/// coordinator. Meeting a node from the current walk means the last node
/// walked closes a cycle; it is moved under the coordinator.
fn break_cycles(
    index: &DeviceIndex<'_>,
    edges: &EdgeQuality,
    assigned: &mut [Option<Assignment>],
) -> usize {
    let coordinator = index.coordinator();
    let coordinator_id = &index.device(coordinator).ieee;
    let mut state = vec![WalkState::Unvisited; assigned.len()];
    state[coordinator] = WalkState::Rooted;
    let mut broken = 0;

    for start in 0..assigned.len() {
        let mut walk = Vec::new();
        let mut current = start;
        loop {
            match state[current] {
                WalkState::Rooted => break,
                WalkState::OnWalk => {
                    if let Some(&closer) = walk.last() {
                        let device = index.device(closer);
                        warn!(
                            ieee = %device.ieee,
                            "Parent cycle detected, attaching device to coordinator"
                        );
                        assigned[closer] = Some(Assignment {
                            parent: coordinator,
                            lqi: known_quality(edges.between(&device.ieee, coordinator_id)),
                            placement: Placement::CycleBreak,
                        });
                        broken += 1;
                    }
                    break;
                }
                WalkState::Unvisited => {
                    state[current] = WalkState::OnWalk;
                    walk.push(current);
                    match assigned[current] {
                        Some(assignment) => current = assignment.parent,
                        // Unplaced devices cannot occur after tier 3
                        None => break,
                    }
                }
            }
        }
        for slot in walk {
            state[slot] = WalkState::Rooted;
        }
    }

    broken
}
