// ── Topology snapshot ──
//
// An immutable, internally consistent view of the mesh. Devices and the
// links derived from them live in the same value, so swapping one `Arc`
// swaps both at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::device::{Device, DeviceId, DeviceKind};
use crate::error::CoreError;

/// Directed radio link as reported in `source`'s neighbor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub source: DeviceId,
    pub target: DeviceId,
    /// Link quality indicator, 0-255.
    pub quality: u8,
}

/// Point-in-time view of the device/link graph.
///
/// Invariants, upheld by [`Snapshot::build`]:
/// - the coordinator is present and is the only device of kind
///   [`DeviceKind::Coordinator`];
/// - every link references two devices of this same snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    version: u64,
    committed_at: DateTime<Utc>,
    coordinator: DeviceId,
    devices: BTreeMap<DeviceId, Arc<Device>>,
    links: Vec<Link>,
}

impl Snapshot {
    /// Build a snapshot, normalizing coordinator roles and deriving links.
    ///
    /// Fails if `coordinator` is not among `devices`.
    pub fn build(
        version: u64,
        coordinator: DeviceId,
        mut devices: BTreeMap<DeviceId, Arc<Device>>,
    ) -> Result<Self, CoreError> {
        if !devices.contains_key(&coordinator) {
            return Err(CoreError::malformed(format!(
                "coordinator {coordinator} is not a known device"
            )));
        }

        for (id, device) in &mut devices {
            let is_coordinator = *id == coordinator;
            if is_coordinator && device.kind != DeviceKind::Coordinator {
                Arc::make_mut(device).kind = DeviceKind::Coordinator;
            } else if !is_coordinator && device.kind == DeviceKind::Coordinator {
                debug!(device = %id, "demoting stale coordinator to router");
                Arc::make_mut(device).kind = DeviceKind::Router;
            }
        }

        let mut links = Vec::new();
        for device in devices.values() {
            for (neighbor, quality) in &device.neighbors {
                if *neighbor != device.id && devices.contains_key(neighbor) {
                    links.push(Link {
                        source: device.id.clone(),
                        target: neighbor.clone(),
                        quality: *quality,
                    });
                }
            }
        }

        Ok(Self {
            version,
            committed_at: Utc::now(),
            coordinator,
            devices,
            links,
        })
    }

    /// Version-0 snapshot holding only the coordinator.
    pub fn initial(coordinator: DeviceId) -> Self {
        let device = Device::new(coordinator.clone(), "Coordinator", DeviceKind::Coordinator);
        let mut devices = BTreeMap::new();
        devices.insert(coordinator.clone(), Arc::new(device));
        Self {
            version: 0,
            committed_at: Utc::now(),
            coordinator,
            devices,
            links: Vec::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn coordinator_id(&self) -> &DeviceId {
        &self.coordinator
    }

    pub fn coordinator(&self) -> &Arc<Device> {
        &self.devices[&self.coordinator]
    }

    pub fn is_coordinator(&self, id: &DeviceId) -> bool {
        self.coordinator == *id
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Arc<Device>> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Devices in identity order.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// First device whose friendly name matches, ignoring ASCII case.
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Device>> {
        let name = name.trim();
        self.devices
            .values()
            .find(|d| d.friendly_name.eq_ignore_ascii_case(name))
    }

    /// Resolve an operator-supplied reference: identity first, then name.
    pub fn lookup(&self, reference: &str) -> Option<&Arc<Device>> {
        self.device(&DeviceId::new(reference))
            .or_else(|| self.find_by_name(reference))
    }

    pub(crate) fn device_map(&self) -> &BTreeMap<DeviceId, Arc<Device>> {
        &self.devices
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn map(devices: Vec<Device>) -> BTreeMap<DeviceId, Arc<Device>> {
        devices
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect()
    }

    #[test]
    fn build_rejects_missing_coordinator() {
        let devices = map(vec![Device::new("0x1234", "lamp", DeviceKind::Router)]);
        let err = Snapshot::build(1, DeviceId::new("0x0000"), devices).unwrap_err();
        assert!(matches!(err, CoreError::MalformedTelemetry { .. }));
    }

    #[test]
    fn build_keeps_exactly_one_coordinator() {
        let devices = map(vec![
            Device::new("0x0000", "old", DeviceKind::Coordinator),
            Device::new("0x0001", "new", DeviceKind::Router),
        ]);
        let snap = Snapshot::build(1, DeviceId::new("0x0001"), devices).unwrap();

        let coordinators: Vec<_> = snap
            .devices()
            .filter(|d| d.kind == DeviceKind::Coordinator)
            .collect();
        assert_eq!(coordinators.len(), 1);
        assert_eq!(coordinators[0].id, DeviceId::new("0x0001"));
        assert_eq!(
            snap.device(&DeviceId::new("0x0000")).unwrap().kind,
            DeviceKind::Router
        );
    }

    #[test]
    fn links_to_unknown_devices_are_not_materialized() {
        let devices = map(vec![
            Device::new("0x0000", "coord", DeviceKind::Coordinator),
            Device::new("0x1234", "lamp", DeviceKind::Router)
                .with_neighbor("0x0000", 80)
                .with_neighbor("0x9999", 200),
        ]);
        let snap = Snapshot::build(1, DeviceId::new("0x0000"), devices).unwrap();

        assert_eq!(snap.links().len(), 1);
        assert_eq!(snap.links()[0].target, DeviceId::new("0x0000"));
        assert!(
            snap.links()
                .iter()
                .all(|l| snap.contains(&l.source) && snap.contains(&l.target))
        );
    }

    #[test]
    fn lookup_accepts_identity_or_name() {
        let devices = map(vec![
            Device::new("0x0000", "coord", DeviceKind::Coordinator),
            Device::new("0x1234", "Kitchen Light", DeviceKind::Router),
        ]);
        let snap = Snapshot::build(1, DeviceId::new("0x0000"), devices).unwrap();

        assert_eq!(
            snap.lookup("0X1234").unwrap().friendly_name,
            "Kitchen Light"
        );
        assert_eq!(
            snap.lookup("kitchen light").unwrap().id,
            DeviceId::new("0x1234")
        );
        assert!(snap.lookup("garage").is_none());
    }

    #[test]
    fn initial_snapshot_has_only_the_coordinator() {
        let snap = Snapshot::initial(DeviceId::new("0x0000"));
        assert_eq!(snap.version(), 0);
        assert_eq!(snap.device_count(), 1);
        assert_eq!(snap.coordinator().kind, DeviceKind::Coordinator);
    }
}
