//! Snapshot ingestion from ZHA export files
//!
//! The exporter writes whatever Home Assistant returned, so numeric fields
//! arrive as integers, floats, decimal strings or `0x`-prefixed hex strings.
//! Every loosely-typed field is normalized exactly once here; the inference
//! engine only ever sees the typed model from [`crate::device`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::device::{
    Device, DeviceId, DeviceType, NeighborRecord, Nwk, Relationship, RouteRecord, RouteStatus,
};

/// Default file name prefix of exporter output
pub const EXPORT_PREFIX: &str = "zha_full_export_";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Counters for non-fatal problems found while normalizing raw input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Network addresses or link qualities that were not numeric or out of range
    pub malformed_numerics: usize,
    /// Device entries without an IEEE address
    pub devices_without_ieee: usize,
    /// Neighbor entries without an IEEE address
    pub neighbors_without_ieee: usize,
}

/// Network-wide metadata from the export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub channel: Option<u8>,
    pub pan_id: Option<String>,
    pub extended_pan_id: Option<String>,
}

/// One immutable, fully normalized export of the mesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the exporter produced the data (as written by the exporter)
    pub export_timestamp: Option<String>,
    pub network: NetworkInfo,
    /// Devices in export order; this order drives every tie-break
    pub devices: Vec<Device>,
    pub stats: IngestStats,
}

#[derive(Debug, Deserialize)]
struct RawExport {
    #[serde(default)]
    export_timestamp: Option<String>,
    #[serde(default)]
    network_settings: Option<RawNetworkSettings>,
    #[serde(default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawNetworkSettings {
    #[serde(default)]
    network_info: Option<RawNetworkInfo>,
}

#[derive(Debug, Deserialize)]
struct RawNetworkInfo {
    #[serde(default)]
    channel: Value,
    #[serde(default)]
    pan_id: Value,
    #[serde(default)]
    extended_pan_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(default)]
    ieee: Option<String>,
    #[serde(default)]
    nwk: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user_given_name: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    lqi: Value,
    #[serde(default)]
    available: Option<bool>,
    #[serde(default)]
    last_seen: Option<String>,
    #[serde(default)]
    device_reg_id: Option<String>,
    #[serde(default)]
    neighbors: Vec<RawNeighbor>,
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
struct RawNeighbor {
    #[serde(default)]
    ieee: Option<String>,
    #[serde(default)]
    nwk: Value,
    #[serde(default)]
    lqi: Value,
    #[serde(default)]
    relationship: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    #[serde(default)]
    dest_nwk: Value,
    #[serde(default)]
    next_hop: Value,
    #[serde(default)]
    route_status: Option<String>,
}

impl Snapshot {
    /// Parse and normalize an export document
    pub fn from_json_str(content: &str) -> Result<Self, SnapshotError> {
        let raw: RawExport = serde_json::from_str(content)?;
        Ok(Self::from_raw(raw))
    }

    /// Load and normalize an export file
    pub fn from_file(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            devices = snapshot.devices.len(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Build a snapshot from already typed devices
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    fn from_raw(raw: RawExport) -> Self {
        let mut stats = IngestStats::default();

        let network = raw
            .network_settings
            .and_then(|s| s.network_info)
            .map(|info| NetworkInfo {
                channel: parse_integer(&info.channel)
                    .and_then(|c| u8::try_from(c).ok()),
                pan_id: match &info.pan_id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                },
                extended_pan_id: info.extended_pan_id,
            })
            .unwrap_or_default();

        let mut devices = Vec::with_capacity(raw.devices.len());
        for raw_device in raw.devices {
            match normalize_device(raw_device, &mut stats) {
                Some(device) => devices.push(device),
                None => stats.devices_without_ieee += 1,
            }
        }

        if stats.malformed_numerics > 0 {
            debug!(count = stats.malformed_numerics, "Coerced malformed numeric fields");
        }

        Self {
            export_timestamp: raw.export_timestamp,
            network,
            devices,
            stats,
        }
    }
}

fn normalize_device(raw: RawDevice, stats: &mut IngestStats) -> Option<Device> {
    let ieee = raw.ieee.filter(|s| !s.is_empty())?;

    let name = raw
        .user_given_name
        .filter(|s| !s.is_empty())
        .or(raw.name.filter(|s| !s.is_empty()))
        .unwrap_or_else(|| ieee.clone());

    let mut neighbors = Vec::with_capacity(raw.neighbors.len());
    for n in raw.neighbors {
        let Some(neighbor_ieee) = n.ieee.filter(|s| !s.is_empty()) else {
            stats.neighbors_without_ieee += 1;
            continue;
        };
        neighbors.push(NeighborRecord {
            ieee: DeviceId(neighbor_ieee),
            nwk: normalize_nwk(&n.nwk, stats),
            lqi: normalize_lqi(&n.lqi, stats).unwrap_or(0),
            relationship: n
                .relationship
                .as_deref()
                .map(Relationship::from_zha)
                .unwrap_or_default(),
            device_type: n
                .device_type
                .as_deref()
                .map(DeviceType::from_zha)
                .unwrap_or_default(),
        });
    }

    let routes = raw
        .routes
        .into_iter()
        .map(|r| RouteRecord {
            dest_nwk: normalize_nwk(&r.dest_nwk, stats),
            next_hop: normalize_nwk(&r.next_hop, stats),
            status: RouteStatus::from_zha(r.route_status.as_deref().unwrap_or("")),
        })
        .collect();

    Some(Device {
        ieee: DeviceId(ieee),
        nwk: normalize_nwk(&raw.nwk, stats),
        name,
        device_type: raw
            .device_type
            .as_deref()
            .map(DeviceType::from_zha)
            .unwrap_or_default(),
        manufacturer: raw.manufacturer,
        model: raw.model,
        lqi: normalize_lqi(&raw.lqi, stats),
        available: raw.available.unwrap_or(true),
        last_seen: raw.last_seen.as_deref().and_then(parse_timestamp),
        device_reg_id: raw.device_reg_id,
        neighbors,
        routes,
    })
}

/// Integer view of a JSON number or numeric string. Floats are truncated.
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Normalize a network address; unparseable values are dropped and counted
pub fn normalize_nwk(value: &Value, stats: &mut IngestStats) -> Option<Nwk> {
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()).map(Nwk),
        Value::String(s) => s.parse::<Nwk>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        stats.malformed_numerics += 1;
    }
    parsed
}

/// Normalize a link quality into 0..=255.
///
/// `None` means the field was missing or not numeric; callers pick the default.
/// Out-of-range values are clamped and counted as malformed.
pub fn normalize_lqi(value: &Value, stats: &mut IngestStats) -> Option<u8> {
    if value.is_null() {
        return None;
    }
    match parse_integer(value) {
        Some(v) => {
            let clamped = v.clamp(0, u8::MAX as i64);
            if clamped != v {
                stats.malformed_numerics += 1;
            }
            Some(clamped as u8)
        }
        None => {
            stats.malformed_numerics += 1;
            None
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Find the most recent export in `dir`.
///
/// Export names embed a `%Y%m%d_%H%M%S` timestamp, so the lexicographically
/// greatest name is the newest.
pub fn find_latest_export(dir: &Path, prefix: &str) -> Result<Option<PathBuf>, SnapshotError> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(String, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        if latest.as_ref().map_or(true, |(best, _)| name > *best) {
            latest = Some((name, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}
