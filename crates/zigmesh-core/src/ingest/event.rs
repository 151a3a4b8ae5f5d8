// ── Telemetry events ──
//
// Typed form of the bridge's topology notifications. Raw `BridgeEvent`s are
// decoded here; anything whose kind is not a telemetry kind is left for the
// orchestrator to correlate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::gateway::BridgeEvent;
use crate::model::{Device, DeviceId};

/// Neighbor-table entry carried by a full-state report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub source: DeviceId,
    pub target: DeviceId,
    #[serde(alias = "lqi", alias = "linkquality")]
    pub quality: u8,
}

/// A change reported by the bridge, applied in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Device joined or re-announced itself.
    DeviceAnnounced { device: Device },
    DeviceRemoved { id: DeviceId },
    LinkQualityUpdated {
        source: DeviceId,
        neighbor: DeviceId,
        #[serde(alias = "lqi", alias = "linkquality")]
        quality: u8,
    },
    DeviceRenamed {
        id: DeviceId,
        friendly_name: String,
    },
    CoordinatorChanged { id: DeviceId },
    DeviceSeen {
        id: DeviceId,
        #[serde(default = "Utc::now")]
        at: DateTime<Utc>,
    },
    /// Complete picture of the network; replaces everything known.
    FullState {
        coordinator: DeviceId,
        devices: Vec<Device>,
        #[serde(default)]
        links: Vec<LinkReport>,
    },
}

/// Bridge event kinds that carry telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TelemetryKind {
    DeviceAnnounced,
    DeviceRemoved,
    LinkQualityUpdated,
    DeviceRenamed,
    CoordinatorChanged,
    DeviceSeen,
    FullState,
}

impl TelemetryKind {
    /// Payload field that takes the event's `target` when absent.
    fn target_field(self) -> Option<&'static str> {
        match self {
            Self::DeviceRemoved
            | Self::DeviceRenamed
            | Self::CoordinatorChanged
            | Self::DeviceSeen => Some("id"),
            Self::LinkQualityUpdated => Some("source"),
            Self::DeviceAnnounced | Self::FullState => None,
        }
    }
}

impl TelemetryEvent {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Self::DeviceAnnounced { .. } => TelemetryKind::DeviceAnnounced,
            Self::DeviceRemoved { .. } => TelemetryKind::DeviceRemoved,
            Self::LinkQualityUpdated { .. } => TelemetryKind::LinkQualityUpdated,
            Self::DeviceRenamed { .. } => TelemetryKind::DeviceRenamed,
            Self::CoordinatorChanged { .. } => TelemetryKind::CoordinatorChanged,
            Self::DeviceSeen { .. } => TelemetryKind::DeviceSeen,
            Self::FullState { .. } => TelemetryKind::FullState,
        }
    }

    /// Decode a bridge event.
    ///
    /// Returns `None` when the event is not telemetry (an operation
    /// response, say). A telemetry event whose payload does not fit its
    /// kind decodes to `MalformedTelemetry`.
    pub fn decode(event: &BridgeEvent) -> Option<Result<Self, CoreError>> {
        let kind = event.kind.parse::<TelemetryKind>().ok()?;
        Some(decode_payload(kind, event))
    }

    /// Structural checks that need no snapshot.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::DeviceAnnounced { device } => {
                require_id(&device.id, "announced device")?;
                if device.neighbors.contains_key(&device.id) {
                    return Err(CoreError::malformed(format!("self-link on {}", device.id)));
                }
                Ok(())
            }
            Self::DeviceRemoved { id }
            | Self::CoordinatorChanged { id }
            | Self::DeviceSeen { id, .. } => require_id(id, "device"),
            Self::LinkQualityUpdated {
                source, neighbor, ..
            } => {
                require_id(source, "link source")?;
                require_id(neighbor, "link neighbor")?;
                if source == neighbor {
                    return Err(CoreError::malformed(format!("self-link on {source}")));
                }
                Ok(())
            }
            Self::DeviceRenamed { id, friendly_name } => {
                require_id(id, "renamed device")?;
                if friendly_name.trim().is_empty() {
                    return Err(CoreError::malformed(format!("empty name for {id}")));
                }
                Ok(())
            }
            Self::FullState {
                coordinator,
                devices,
                ..
            } => {
                require_id(coordinator, "coordinator")?;
                for device in devices {
                    require_id(&device.id, "device in full state")?;
                }
                if !devices.iter().any(|d| d.id == *coordinator) {
                    return Err(CoreError::malformed(format!(
                        "full state does not list coordinator {coordinator}"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn require_id(id: &DeviceId, what: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        Err(CoreError::malformed(format!("{what} has an empty identity")))
    } else {
        Ok(())
    }
}

fn decode_payload(kind: TelemetryKind, event: &BridgeEvent) -> Result<TelemetryEvent, CoreError> {
    let mut body = match &event.payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(CoreError::malformed(format!(
                "{kind} payload must be an object, got {other}"
            )));
        }
    };

    // Announcements may carry the descriptor bare or under `device`.
    if kind == TelemetryKind::DeviceAnnounced {
        if !body.contains_key("device") {
            let mut wrapped = Map::new();
            wrapped.insert("device".into(), Value::Object(body));
            body = wrapped;
        }
        let device = body.get_mut("device");
        if let (Some(Value::Object(device)), Some(target)) = (device, &event.target) {
            device
                .entry("id")
                .or_insert_with(|| Value::String(target.to_string()));
        }
    }

    if let (Some(field), Some(target)) = (kind.target_field(), &event.target) {
        body.entry(field)
            .or_insert_with(|| Value::String(target.to_string()));
    }

    body.insert("type".into(), Value::String(kind.to_string()));

    let decoded: TelemetryEvent = serde_json::from_value(Value::Object(body))
        .map_err(|e| CoreError::malformed(format!("{kind}: {e}")))?;
    decoded.validate()?;
    Ok(decoded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::DeviceKind;
    use crate::operation::OperationKind;

    fn event(kind: &str, target: Option<&str>, payload: Value) -> BridgeEvent {
        BridgeEvent::new(kind, target.map(DeviceId::new), payload)
    }

    #[test]
    fn operation_responses_are_not_telemetry() {
        let ack = BridgeEvent::ack(OperationKind::Rename, None);
        assert!(TelemetryEvent::decode(&ack).is_none());
    }

    #[test]
    fn announce_accepts_bare_descriptor() {
        let raw = event(
            "device_announced",
            Some("0x1234"),
            json!({ "friendly_name": "lamp", "type": "Router", "neighbors": { "0x0000": 80 } }),
        );
        let decoded = TelemetryEvent::decode(&raw).unwrap().unwrap();
        let TelemetryEvent::DeviceAnnounced { device } = decoded else {
            panic!("expected announcement, got {decoded:?}");
        };
        assert_eq!(device.id, DeviceId::new("0x1234"));
        assert_eq!(device.kind, DeviceKind::Router);
        assert_eq!(device.link_quality_to(&DeviceId::new("0x0000")), Some(80));
    }

    #[test]
    fn wrapped_announce_takes_identity_from_target() {
        let raw = event(
            "device_announced",
            Some("0x1234"),
            json!({ "device": { "friendly_name": "lamp", "type": "Router" } }),
        );
        let decoded = TelemetryEvent::decode(&raw).unwrap().unwrap();
        let TelemetryEvent::DeviceAnnounced { device } = decoded else {
            panic!("expected announcement, got {decoded:?}");
        };
        assert_eq!(device.id, DeviceId::new("0x1234"));
        assert_eq!(device.friendly_name, "lamp");
    }

    #[test]
    fn wrapped_announce_keeps_its_own_identity() {
        let raw = event(
            "device_announced",
            Some("0x1234"),
            json!({ "device": { "id": "0x5678", "friendly_name": "plug" } }),
        );
        let decoded = TelemetryEvent::decode(&raw).unwrap().unwrap();
        let TelemetryEvent::DeviceAnnounced { device } = decoded else {
            panic!("expected announcement, got {decoded:?}");
        };
        assert_eq!(device.id, DeviceId::new("0x5678"));
    }

    #[test]
    fn announce_listing_itself_as_neighbor_is_malformed() {
        for payload in [
            json!({ "friendly_name": "lamp", "neighbors": { "0x1234": 90, "0x0000": 80 } }),
            json!({ "device": { "friendly_name": "lamp", "neighbors": { "0x1234": 90 } } }),
        ] {
            let raw = event("device_announced", Some("0x1234"), payload);
            let err = TelemetryEvent::decode(&raw).unwrap().unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedTelemetry { .. }),
                "{err:?}"
            );
        }
    }

    #[test]
    fn target_fills_in_missing_identity() {
        let raw = event(
            "link_quality_updated",
            Some("0xAAAA"),
            json!({ "neighbor": "0xbbbb", "lqi": 42 }),
        );
        assert_eq!(
            TelemetryEvent::decode(&raw).unwrap().unwrap(),
            TelemetryEvent::LinkQualityUpdated {
                source: DeviceId::new("0xaaaa"),
                neighbor: DeviceId::new("0xbbbb"),
                quality: 42,
            }
        );
    }

    #[test]
    fn self_link_is_malformed() {
        let raw = event(
            "link_quality_updated",
            Some("0xaaaa"),
            json!({ "neighbor": "0xaaaa", "quality": 9 }),
        );
        let err = TelemetryEvent::decode(&raw).unwrap().unwrap_err();
        assert!(matches!(err, CoreError::MalformedTelemetry { .. }));
    }

    #[test]
    fn out_of_range_quality_is_malformed() {
        let raw = event(
            "link_quality_updated",
            Some("0xaaaa"),
            json!({ "neighbor": "0xbbbb", "quality": 300 }),
        );
        assert!(TelemetryEvent::decode(&raw).unwrap().is_err());
    }

    #[test]
    fn empty_rename_is_malformed() {
        let raw = event(
            "device_renamed",
            Some("0x1234"),
            json!({ "friendly_name": "  " })
        );
        assert!(TelemetryEvent::decode(&raw).unwrap().is_err());
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let raw = event("device_removed", Some("0x1234"), json!([1, 2, 3]));
        assert!(TelemetryEvent::decode(&raw).unwrap().is_err());
    }

    #[test]
    fn full_state_must_list_its_coordinator() {
        let raw = event(
            "full_state",
            None,
            json!({ "coordinator": "0x0000", "devices": [{ "id": "0x1234" }] }),
        );
        assert!(TelemetryEvent::decode(&raw).unwrap().is_err());

        let raw = event(
            "full_state",
            None,
            json!({
                "coordinator": "0x0000",
                "devices": [{ "id": "0x0000" }, { "id": "0x1234" }],
                "links": [{ "source": "0x1234", "target": "0x0000", "linkquality": 80 }]
            }),
        );
        let decoded = TelemetryEvent::decode(&raw).unwrap().unwrap();
        assert_eq!(decoded.kind(), TelemetryKind::FullState);
    }
}
