//! Per-run lookup tables over a snapshot's devices
//!
//! Devices live in an arena (a `Vec` in caller order) and are referred to by
//! slot. The index is built once per inference run and dropped with it.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::device::{Device, DeviceId, DeviceType, Nwk};
use crate::topology::TopologyError;

/// Position of a device in the index arena
pub type Slot = usize;

/// Identity and address lookups for one snapshot
#[derive(Debug)]
pub struct DeviceIndex<'a> {
    devices: Vec<&'a Device>,
    by_ieee: HashMap<&'a str, Slot>,
    by_nwk: HashMap<Nwk, Slot>,
    coordinator: Slot,
    duplicates: usize,
}

impl<'a> DeviceIndex<'a> {
    /// Index `devices`, keeping the first occurrence of each identity.
    ///
    /// Fails when no device is a coordinator. When several are, the first
    /// one is the root and the rest are indexed as ordinary devices.
    pub fn new(devices: &'a [Device]) -> Result<Self, TopologyError> {
        let mut arena = Vec::with_capacity(devices.len());
        let mut by_ieee = HashMap::with_capacity(devices.len());
        let mut by_nwk = HashMap::with_capacity(devices.len());
        let mut coordinator = None;
        let mut duplicates = 0;

        for device in devices {
            if by_ieee.contains_key(device.ieee.as_str()) {
                warn!(ieee = %device.ieee, "Duplicate device entry ignored");
                duplicates += 1;
                continue;
            }

            let slot = arena.len();
            arena.push(device);
            by_ieee.insert(device.ieee.as_str(), slot);

            if let Some(nwk) = device.nwk {
                if let Some(&existing) = by_nwk.get(&nwk) {
                    let existing: &Device = arena[existing];
                    debug!(
                        %nwk,
                        kept = %existing.ieee,
                        ignored = %device.ieee,
                        "Network address reported by two devices"
                    );
                } else {
                    by_nwk.insert(nwk, slot);
                }
            }

            if device.device_type == DeviceType::Coordinator {
                if coordinator.is_none() {
                    coordinator = Some(slot);
                } else {
                    warn!(ieee = %device.ieee, "Additional coordinator treated as ordinary device");
                }
            }
        }

        let coordinator = coordinator.ok_or(TopologyError::MissingCoordinator)?;

        Ok(Self {
            devices: arena,
            by_ieee,
            by_nwk,
            coordinator,
            duplicates,
        })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Slot of the root coordinator
    pub fn coordinator(&self) -> Slot {
        self.coordinator
    }

    pub fn device(&self, slot: Slot) -> &'a Device {
        self.devices[slot]
    }

    /// Devices with their slots, in caller order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &'a Device)> + '_ {
        self.devices.iter().copied().enumerate()
    }

    pub fn slot_of(&self, id: &DeviceId) -> Option<Slot> {
        self.by_ieee.get(id.as_str()).copied()
    }

    /// Resolve a network address. Address 0 always means the root coordinator.
    pub fn slot_of_nwk(&self, nwk: Nwk) -> Option<Slot> {
        if nwk.is_coordinator() {
            return Some(self.coordinator);
        }
        self.by_nwk.get(&nwk).copied()
    }

    /// Type of the device in `slot`, with extra coordinators demoted to routers
    pub fn device_type(&self, slot: Slot) -> DeviceType {
        match self.devices[slot].device_type {
            DeviceType::Coordinator if slot != self.coordinator => DeviceType::Router,
            other => other,
        }
    }

    pub fn is_relay(&self, slot: Slot) -> bool {
        self.device_type(slot).is_relay()
    }

    /// Device entries skipped because their identity was already indexed
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lookups() {
        let devices = vec![
            Device::new("c", DeviceType::Coordinator).with_nwk(0),
            Device::new("r1", DeviceType::Router).with_nwk(0x1111),
            Device::new("e1", DeviceType::EndDevice).with_nwk(0x2222),
        ];
        let index = DeviceIndex::new(&devices).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.coordinator(), 0);
        assert_eq!(index.slot_of(&DeviceId::from_ieee("e1")), Some(2));
        assert_eq!(index.slot_of(&DeviceId::from_ieee("zz")), None);
        assert_eq!(index.slot_of_nwk(Nwk(0x1111)), Some(1));
        assert_eq!(index.slot_of_nwk(Nwk(0)), Some(0));
        assert_eq!(index.slot_of_nwk(Nwk(0x9999)), None);
    }

    #[test]
    fn test_missing_coordinator() {
        let devices = vec![Device::new("r1", DeviceType::Router)];
        assert!(matches!(
            DeviceIndex::new(&devices),
            Err(TopologyError::MissingCoordinator)
        ));
        assert!(matches!(
            DeviceIndex::new(&[]),
            Err(TopologyError::MissingCoordinator)
        ));
    }

    #[test]
    fn test_duplicates_and_extra_coordinators() {
        let devices = vec![
            Device::new("r1", DeviceType::Router).with_nwk(0x10),
            Device::new("c", DeviceType::Coordinator),
            Device::new("r1", DeviceType::EndDevice),
            Device::new("c2", DeviceType::Coordinator).with_nwk(0x10),
        ];
        let index = DeviceIndex::new(&devices).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.duplicates(), 1);
        assert_eq!(index.coordinator(), 1);
        assert_eq!(index.device_type(0), DeviceType::Router);
        assert_eq!(index.device_type(2), DeviceType::Router);
        // first claimant of a network address wins
        assert_eq!(index.slot_of_nwk(Nwk(0x10)), Some(0));
    }
}
