//! Mesh entity types: devices and the neighbor/route records they report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable device identity, the IEEE address in its string form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a DeviceId from an IEEE address string
    pub fn from_ieee(ieee: &str) -> Self {
        Self(ieee.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short (16-bit) network address. Reassignable, unlike the IEEE address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nwk(pub u16);

impl Nwk {
    /// The coordinator always owns network address 0
    pub const COORDINATOR: Nwk = Nwk(0);

    pub fn is_coordinator(&self) -> bool {
        *self == Self::COORDINATOR
    }
}

impl fmt::Display for Nwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Error returned when a network address string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid network address: {0:?}")]
pub struct ParseNwkError(pub String);

impl FromStr for Nwk {
    type Err = ParseNwkError;

    /// Accepts decimal ("4660") or hex with a `0x` prefix ("0x1234")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => trimmed.parse::<u16>(),
        };
        parsed.map(Nwk).map_err(|_| ParseNwkError(s.to_string()))
    }
}

/// Zigbee logical device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
    Unknown,
}

impl DeviceType {
    /// Map the type string used by ZHA exports
    pub fn from_zha(value: &str) -> Self {
        match value {
            "Coordinator" => Self::Coordinator,
            "Router" => Self::Router,
            "EndDevice" => Self::EndDevice,
            _ => Self::Unknown,
        }
    }

    /// Whether a device of this type can relay traffic (and therefore parent others)
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::Router | Self::Coordinator)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Relationship of a neighbor, seen from the reporting device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    /// The neighbor is the reporter's parent
    Parent,
    /// The neighbor is the reporter's child
    Child,
    Sibling,
    Unknown,
}

impl Relationship {
    pub fn from_zha(value: &str) -> Self {
        match value {
            "Parent" => Self::Parent,
            "Child" => Self::Child,
            "Sibling" => Self::Sibling,
            _ => Self::Unknown,
        }
    }
}

impl Default for Relationship {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Status of a routing table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    Active,
    ValidationUnderway,
    /// Any other status string (inactive, discovery failed, ...)
    Other(String),
}

impl RouteStatus {
    pub fn from_zha(value: &str) -> Self {
        match value {
            "Active" => Self::Active,
            "Validation_Underway" => Self::ValidationUnderway,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only active or validating routes carry traffic
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active | Self::ValidationUnderway)
    }
}

/// One entry of a device's neighbor table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRecord {
    /// Identity of the neighbor
    pub ieee: DeviceId,
    /// Network address of the neighbor, if reported and parseable
    pub nwk: Option<Nwk>,
    /// Link quality of this report (0 when missing)
    pub lqi: u8,
    /// Relationship from the reporting device's point of view
    pub relationship: Relationship,
    /// Type the reporter believes the neighbor has
    pub device_type: DeviceType,
}

impl NeighborRecord {
    pub fn new(ieee: &str, relationship: Relationship, lqi: u8) -> Self {
        Self {
            ieee: DeviceId::from_ieee(ieee),
            nwk: None,
            lqi,
            relationship,
            device_type: DeviceType::Unknown,
        }
    }
}

/// One entry of a device's routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub dest_nwk: Option<Nwk>,
    pub next_hop: Option<Nwk>,
    pub status: RouteStatus,
}

impl RouteRecord {
    /// A usable route whose destination is the coordinator
    pub fn is_coordinator_route(&self) -> bool {
        self.status.is_usable() && self.dest_nwk.is_some_and(|nwk| nwk.is_coordinator())
    }
}

/// A Zigbee device with its reported neighbor and routing tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable identity (IEEE address)
    pub ieee: DeviceId,
    /// Short network address, if known
    pub nwk: Option<Nwk>,
    /// Display name (user given name when set)
    pub name: String,
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Last link quality the device itself reported; informational only
    pub lqi: Option<u8>,
    pub available: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Home Assistant device registry id
    pub device_reg_id: Option<String>,
    pub neighbors: Vec<NeighborRecord>,
    pub routes: Vec<RouteRecord>,
}

impl Device {
    /// Create a device with minimal information
    pub fn new(ieee: &str, device_type: DeviceType) -> Self {
        Self {
            ieee: DeviceId::from_ieee(ieee),
            nwk: None,
            name: ieee.to_string(),
            device_type,
            manufacturer: None,
            model: None,
            lqi: None,
            available: true,
            last_seen: None,
            device_reg_id: None,
            neighbors: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_nwk(mut self, nwk: u16) -> Self {
        self.nwk = Some(Nwk(nwk));
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_neighbor(mut self, neighbor: NeighborRecord) -> Self {
        self.neighbors.push(neighbor);
        self
    }

    pub fn with_route(mut self, route: RouteRecord) -> Self {
        self.routes.push(route);
        self
    }

    pub fn is_coordinator(&self) -> bool {
        self.device_type == DeviceType::Coordinator
    }
}
