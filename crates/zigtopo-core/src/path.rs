//! Path resolution from any device up to the coordinator
//!
//! Walks primary links hop by hop with a visited set, so malformed or cyclic
//! link data yields a partial path instead of looping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::device::{DeviceId, DeviceType};
use crate::index::DeviceIndex;
use crate::primary_link::PrimaryLinks;

/// One hop on the way to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHop {
    /// Device this hop arrives at
    pub id: DeviceId,
    pub name: String,
    /// Quality of the link used for this hop
    pub lqi: Option<u8>,
    pub device_type: DeviceType,
}

/// Ordered hops from a device to the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorPath {
    pub hops: Vec<PathHop>,
    /// False when the walk stopped at a cycle or dead end
    pub complete: bool,
}

impl CoordinatorPath {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// Walk primary links from `start` to the coordinator.
///
/// The path never contains `start` or any identity twice, and takes at most
/// as many steps as there are devices.
pub fn path_to_coordinator(
    index: &DeviceIndex<'_>,
    links: &PrimaryLinks,
    start: &DeviceId,
) -> CoordinatorPath {
    let coordinator = &index.device(index.coordinator()).ieee;
    let mut path = CoordinatorPath::default();
    let mut visited: HashSet<&DeviceId> = HashSet::new();
    visited.insert(start);
    let mut current = start;

    loop {
        if current == coordinator {
            path.complete = true;
            break;
        }
        let Some(link) = links.get(current) else {
            debug!(ieee = %current, "Path walk hit a device without a primary link");
            break;
        };
        if !visited.insert(&link.target) {
            debug!(ieee = %start, revisited = %link.target, "Path walk found a cycle");
            break;
        }

        let target = index.slot_of(&link.target);
        path.hops.push(PathHop {
            id: link.target.clone(),
            name: target.map_or_else(
                || link.target.to_string(),
                |slot| index.device(slot).name.clone(),
            ),
            lqi: link.lqi,
            device_type: target.map_or(DeviceType::Unknown, |slot| index.device_type(slot)),
        });
        if target.is_none() {
            break;
        }
        current = &link.target;
    }

    path
}

/// Paths for every indexed device; the coordinator's is empty and complete
pub fn resolve_paths(
    index: &DeviceIndex<'_>,
    links: &PrimaryLinks,
) -> BTreeMap<DeviceId, CoordinatorPath> {
    index
        .iter()
        .map(|(_, device)| {
            (
                device.ieee.clone(),
                path_to_coordinator(index, links, &device.ieee),
            )
        })
        .collect()
}
