//! Edge reduction: one undirected, best-quality edge per device pair
//!
//! Both ends of a link usually report each other, often more than once and
//! with different link qualities. The reducer keys every report by the
//! lexicographically sorted identity pair and keeps the maximum.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::DeviceId;
use crate::index::DeviceIndex;

/// Canonical (sorted) identity pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(DeviceId, DeviceId);

impl EdgeKey {
    pub fn new(a: &DeviceId, b: &DeviceId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }

    pub fn ends(&self) -> (&DeviceId, &DeviceId) {
        (&self.0, &self.1)
    }
}

/// An undirected mesh link with its best reported quality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub a: DeviceId,
    pub b: DeviceId,
    pub lqi: u8,
}

/// Best link quality per device pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeQuality {
    best: BTreeMap<EdgeKey, u8>,
}

impl EdgeQuality {
    /// Reduce every neighbor report between two known, distinct devices
    pub fn reduce(index: &DeviceIndex<'_>) -> Self {
        let mut quality = Self::default();
        for (_, device) in index.iter() {
            for neighbor in &device.neighbors {
                if neighbor.ieee == device.ieee || index.slot_of(&neighbor.ieee).is_none() {
                    continue;
                }
                quality.record(&device.ieee, &neighbor.ieee, neighbor.lqi);
            }
        }
        quality
    }

    /// Fold one directional report into the pair's best quality
    pub fn record(&mut self, a: &DeviceId, b: &DeviceId, lqi: u8) {
        let entry = self.best.entry(EdgeKey::new(a, b)).or_insert(lqi);
        if lqi > *entry {
            *entry = lqi;
        }
    }

    /// Best quality seen between `a` and `b` in either direction, 0 if never reported
    pub fn between(&self, a: &DeviceId, b: &DeviceId) -> u8 {
        self.best.get(&EdgeKey::new(a, b)).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// All edges, ordered by canonical key
    pub fn edges(&self) -> Vec<Edge> {
        self.best
            .iter()
            .map(|(key, &lqi)| {
                let (a, b) = key.ends();
                Edge {
                    a: a.clone(),
                    b: b.clone(),
                    lqi,
                }
            })
            .collect()
    }
}
