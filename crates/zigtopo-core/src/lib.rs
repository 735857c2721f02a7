//! zigtopo Core - Zigbee mesh model and topology inference
//!
//! This crate turns an exported snapshot of a Zigbee (ZHA) network into a
//! deterministic topology:
//! - Typed device, neighbor and route records with one-time normalization
//! - Edge reduction to one best-quality link per device pair
//! - A parent/child hierarchy rooted at the coordinator
//! - A per-device primary uplink and the path it implies to the coordinator

pub mod device;
pub mod edge;
pub mod hierarchy;
pub mod index;
pub mod path;
pub mod primary_link;
pub mod snapshot;
pub mod summary;
pub mod topology;

pub use device::{Device, DeviceId, DeviceType, NeighborRecord, Nwk, Relationship, RouteRecord, RouteStatus};
pub use edge::{Edge, EdgeQuality};
pub use hierarchy::{ChildLink, Hierarchy, Placement};
pub use index::DeviceIndex;
pub use path::{CoordinatorPath, PathHop};
pub use primary_link::{LinkSource, PrimaryLink, PrimaryLinks};
pub use snapshot::{find_latest_export, Snapshot, SnapshotError, EXPORT_PREFIX};
pub use summary::{NetworkSummary, DEFAULT_WEAK_LQI};
pub use topology::{Diagnostics, Topology, TopologyError, TopologyNode};
