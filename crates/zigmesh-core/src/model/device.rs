// ── Device domain types ──
//
// DeviceId is the foundation of every other type: operations, links and
// snapshots are all keyed by it, never by the mutable friendly name.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── DeviceId ────────────────────────────────────────────────────────

/// Identity of a Zigbee device, normalized to lowercase (`0x00124b0012345678`).
///
/// Stable across renames. Ordering is plain string ordering, which is what
/// route tie-breaking relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a normalized identity. Surrounding whitespace is dropped.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

// ── DeviceKind ──────────────────────────────────────────────────────

/// Role of a device in the mesh.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeviceKind {
    #[serde(alias = "Coordinator")]
    Coordinator,
    #[serde(alias = "Router")]
    Router,
    #[serde(alias = "EndDevice")]
    #[strum(to_string = "end_device", serialize = "enddevice")]
    EndDevice,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceKind {
    /// Whether the device relays traffic for others.
    pub fn is_router(self) -> bool {
        matches!(self, Self::Coordinator | Self::Router)
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// A paired device (or the coordinator) as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default, rename = "type")]
    pub kind: DeviceKind,
    /// Capability tags (`"light"`, `"ota"`, `"battery"`, ...).
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Link quality (LQI, 0-255) this device reports for each neighbor.
    #[serde(default)]
    pub neighbors: BTreeMap<DeviceId, u8>,
}

impl Device {
    pub fn new(
        id: impl Into<DeviceId>,
        friendly_name: impl Into<String>,
        kind: DeviceKind,
    ) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            kind,
            capabilities: Vec::new(),
            model: None,
            vendor: None,
            last_seen: None,
            neighbors: BTreeMap::new(),
        }
    }

    /// Builder-style neighbor insertion, mostly for fixtures.
    pub fn with_neighbor(mut self, neighbor: impl Into<DeviceId>, quality: u8) -> Self {
        self.neighbors.insert(neighbor.into(), quality);
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn link_quality_to(&self, neighbor: &DeviceId) -> Option<u8> {
        self.neighbors.get(neighbor).copied()
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }

    /// Friendly name, or the identity when the bridge never named it.
    pub fn display_name(&self) -> &str {
        if self.friendly_name.is_empty() {
            self.id.as_str()
        } else {
            &self.friendly_name
        }
    }
}
