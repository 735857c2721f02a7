//! Network summary statistics for reports

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::device::{DeviceId, DeviceType};
use crate::primary_link::LinkSource;
use crate::topology::Topology;

/// Devices whose own lqi is below this are reported as weak
pub const DEFAULT_WEAK_LQI: u8 = 50;

/// Average/min/max over a set of link qualities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LqiStats {
    pub average: f64,
    pub min: u8,
    pub max: u8,
}

impl LqiStats {
    pub fn from_values(values: &[u8]) -> Option<Self> {
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let sum: u64 = values.iter().map(|&v| v as u64).sum();
        Some(Self {
            average: sum as f64 / values.len() as f64,
            min,
            max,
        })
    }

    /// Average as a percentage of the 0-255 scale
    pub fn average_percent(&self) -> f64 {
        self.average / 255.0 * 100.0
    }
}

/// A device with a weak own link quality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakDevice {
    pub id: DeviceId,
    pub name: String,
    pub lqi: u8,
}

/// Headline numbers for one inferred topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub total: usize,
    pub coordinators: usize,
    pub routers: usize,
    pub end_devices: usize,
    pub unavailable: usize,
    pub device_lqi: Option<LqiStats>,
    /// Ascending by lqi
    pub weak_devices: Vec<WeakDevice>,
    pub links: usize,
    /// Over links with a non-zero quality
    pub link_lqi: Option<LqiStats>,
    pub primary_sources: BTreeMap<LinkSource, usize>,
    pub weak_threshold: u8,
}

impl NetworkSummary {
    pub fn from_topology(topology: &Topology, weak_threshold: u8) -> Self {
        let count = |t: DeviceType| topology.nodes.iter().filter(|n| n.device_type == t).count();

        let device_lqis: Vec<u8> = topology.nodes.iter().filter_map(|n| n.lqi).collect();

        let mut weak_devices: Vec<WeakDevice> = topology
            .nodes
            .iter()
            .filter_map(|n| match n.lqi {
                Some(lqi) if lqi < weak_threshold => Some(WeakDevice {
                    id: n.id.clone(),
                    name: n.name.clone(),
                    lqi,
                }),
                _ => None,
            })
            .collect();
        weak_devices.sort_by_key(|w| w.lqi);

        let link_lqis: Vec<u8> = topology
            .edges
            .iter()
            .map(|e| e.lqi)
            .filter(|&lqi| lqi > 0)
            .collect();

        Self {
            total: topology.nodes.len(),
            coordinators: count(DeviceType::Coordinator),
            routers: count(DeviceType::Router),
            end_devices: count(DeviceType::EndDevice),
            unavailable: topology.nodes.iter().filter(|n| !n.available).count(),
            device_lqi: LqiStats::from_values(&device_lqis),
            weak_devices,
            links: topology.edges.len(),
            link_lqi: LqiStats::from_values(&link_lqis),
            primary_sources: topology.primary_links.count_by_source(),
            weak_threshold,
        }
    }
}

impl fmt::Display for NetworkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Devices: {} total", self.total)?;
        writeln!(f, "  - Coordinator: {}", self.coordinators)?;
        writeln!(f, "  - Routers: {}", self.routers)?;
        writeln!(f, "  - End Devices: {}", self.end_devices)?;
        if self.unavailable > 0 {
            writeln!(f, "  - Unavailable: {}", self.unavailable)?;
        }

        if let Some(stats) = &self.device_lqi {
            writeln!(f)?;
            writeln!(f, "Device Signal Quality:")?;
            writeln!(
                f,
                "  - Average: {:.0}/255 ({:.0}%)",
                stats.average,
                stats.average_percent()
            )?;
            writeln!(f, "  - Range: {} - {}", stats.min, stats.max)?;
        }

        if !self.weak_devices.is_empty() {
            writeln!(f)?;
            writeln!(f, "[!] Weak Devices (LQI < {}):", self.weak_threshold)?;
            for weak in &self.weak_devices {
                writeln!(f, "  - {}: LQI {}", weak.name, weak.lqi)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Mesh Connections: {} neighbor links", self.links)?;
        if let Some(stats) = &self.link_lqi {
            writeln!(
                f,
                "  - Average link LQI: {:.0}/255 ({:.0}%)",
                stats.average,
                stats.average_percent()
            )?;
            writeln!(f, "  - Range: {} - {}", stats.min, stats.max)?;
        }

        if !self.primary_sources.is_empty() {
            writeln!(f)?;
            writeln!(f, "Primary links by evidence:")?;
            for (source, count) in &self.primary_sources {
                writeln!(f, "  - {}: {}", source, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, NeighborRecord, Relationship};
    use crate::snapshot::Snapshot;

    fn with_lqi(mut device: Device, lqi: u8) -> Device {
        device.lqi = Some(lqi);
        device
    }

    #[test]
    fn test_lqi_stats() {
        assert_eq!(LqiStats::from_values(&[]), None);
        let stats = LqiStats::from_values(&[10, 20, 60]).unwrap();
        assert_eq!(stats.average, 30.0);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 60);
    }

    #[test]
    fn test_summary_counts() {
        let mut offline = with_lqi(Device::new("E2", DeviceType::EndDevice).with_name("Door"), 12);
        offline.available = false;
        let devices = vec![
            Device::new("C", DeviceType::Coordinator)
                .with_neighbor(NeighborRecord::new("R", Relationship::Child, 200))
                .with_neighbor(NeighborRecord::new("E1", Relationship::Unknown, 0)),
            with_lqi(
                Device::new("R", DeviceType::Router)
                    .with_neighbor(NeighborRecord::new("C", Relationship::Parent, 100)),
                220,
            ),
            with_lqi(Device::new("E1", DeviceType::EndDevice).with_name("Window"), 40),
            offline,
        ];
        let topology = Topology::infer(&Snapshot::from_devices(devices)).unwrap();
        let summary = NetworkSummary::from_topology(&topology, DEFAULT_WEAK_LQI);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.coordinators, 1);
        assert_eq!(summary.routers, 1);
        assert_eq!(summary.end_devices, 2);
        assert_eq!(summary.unavailable, 1);

        let names: Vec<&str> = summary.weak_devices.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["Door", "Window"]);

        // C-R at 200 counts, the zero-quality C-E1 edge does not
        assert_eq!(summary.links, 2);
        let link = summary.link_lqi.unwrap();
        assert_eq!((link.min, link.max), (200, 200));

        assert_eq!(summary.primary_sources.get(&LinkSource::Parent), Some(&1));
        assert_eq!(summary.primary_sources.get(&LinkSource::Fallback), Some(&2));

        let text = summary.to_string();
        assert!(text.contains("Devices: 4 total"));
        assert!(text.contains("[!] Weak Devices (LQI < 50):"));
        assert!(text.contains("  - Door: LQI 12"));
        assert!(text.contains("  - parent: 1"));
        assert!(text.contains("  - fallback: 2"));
    }
}
