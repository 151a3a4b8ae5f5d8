// ── State ingestor ──
//
// The single writer of the topology store. Each event is folded into a
// copy of the current device map and committed as the next snapshot.
// Devices are shared between snapshots by `Arc` and only the touched ones
// are cloned (`Arc::make_mut`).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::event::{LinkReport, TelemetryEvent};
use crate::error::CoreError;
use crate::model::{Device, DeviceId, Snapshot};
use crate::store::TopologyStore;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Committed { version: u64 },
    /// Referenced something unknown; the snapshot was left untouched.
    Dropped { reason: String },
}

/// Running totals, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub committed: u64,
    pub dropped: u64,
    pub rejected: u64,
}

/// Folds telemetry into the topology store, strictly in order.
///
/// `apply` takes `&mut self`, so a shared ingestor cannot be driven from
/// two places at once.
pub struct StateIngestor {
    store: Arc<TopologyStore>,
    stats: IngestStats,
}

impl StateIngestor {
    pub fn new(store: Arc<TopologyStore>) -> Self {
        Self {
            store,
            stats: IngestStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<TopologyStore> {
        &self.store
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Apply one event.
    ///
    /// Malformed events are rejected with `MalformedTelemetry` and leave
    /// the snapshot as it was.
    pub fn apply(&mut self, event: TelemetryEvent) -> Result<IngestOutcome, CoreError> {
        let kind = event.kind();
        let result = event.validate().and_then(|()| self.fold(event));

        match &result {
            Ok(IngestOutcome::Committed { version }) => {
                self.stats.committed += 1;
                debug!(%kind, version, "telemetry committed");
            }
            Ok(IngestOutcome::Dropped { reason }) => {
                self.stats.dropped += 1;
                warn!(%kind, %reason, "telemetry dropped");
            }
            Err(err) => {
                self.stats.rejected += 1;
                warn!(%kind, error = %err, "telemetry rejected");
            }
        }
        result
    }

    fn fold(&self, event: TelemetryEvent) -> Result<IngestOutcome, CoreError> {
        let current = self.store.current_snapshot();
        let mut coordinator = current.coordinator_id().clone();
        let mut devices = current.device_map().clone();

        match event {
            TelemetryEvent::DeviceAnnounced { device } => announce(&mut devices, device),

            TelemetryEvent::DeviceRemoved { id } => {
                if id == coordinator {
                    return Err(CoreError::malformed(format!(
                        "cannot remove coordinator {id}"
                    )));
                }
                if devices.remove(&id).is_none() {
                    return Ok(unknown(&id));
                }
                for device in devices.values_mut() {
                    if device.neighbors.contains_key(&id) {
                        Arc::make_mut(device).neighbors.remove(&id);
                    }
                }
            }

            TelemetryEvent::LinkQualityUpdated {
                source,
                neighbor,
                quality,
            } => {
                if !devices.contains_key(&neighbor) {
                    return Ok(unknown(&neighbor));
                }
                let Some(device) = devices.get_mut(&source) else {
                    return Ok(unknown(&source));
                };
                Arc::make_mut(device).neighbors.insert(neighbor, quality);
            }

            TelemetryEvent::DeviceRenamed { id, friendly_name } => {
                let Some(device) = devices.get_mut(&id) else {
                    return Ok(unknown(&id));
                };
                Arc::make_mut(device).friendly_name = friendly_name.trim().to_owned();
            }

            TelemetryEvent::CoordinatorChanged { id } => {
                if !devices.contains_key(&id) {
                    return Ok(unknown(&id));
                }
                coordinator = id;
            }

            TelemetryEvent::DeviceSeen { id, at } => {
                let Some(device) = devices.get_mut(&id) else {
                    return Ok(unknown(&id));
                };
                // Out-of-order sightings never move the clock backwards.
                if device.last_seen.is_none_or(|seen| at > seen) {
                    Arc::make_mut(device).last_seen = Some(at);
                }
            }

            TelemetryEvent::FullState {
                coordinator: reported,
                devices: reported_devices,
                links,
            } => {
                coordinator = reported;
                devices = full_state(reported_devices, &links);
            }
        }

        let next = Snapshot::build(current.version() + 1, coordinator, devices)?;
        let committed = self.store.commit(next)?;
        Ok(IngestOutcome::Committed {
            version: committed.version(),
        })
    }
}

fn unknown(id: &DeviceId) -> IngestOutcome {
    IngestOutcome::Dropped {
        reason: format!("unknown device {id}"),
    }
}

fn announce(devices: &mut BTreeMap<DeviceId, Arc<Device>>, mut device: Device) {
    if let Some(existing) = devices.get(&device.id) {
        if device.neighbors.is_empty() {
            device.neighbors.clone_from(&existing.neighbors);
        }
        if device.last_seen.is_none() {
            device.last_seen = existing.last_seen;
        }
        if device.friendly_name.trim().is_empty() {
            device.friendly_name.clone_from(&existing.friendly_name);
        }
    }
    if device.friendly_name.trim().is_empty() {
        device.friendly_name = device.id.to_string();
    }
    devices.insert(device.id.clone(), Arc::new(device));
}

fn full_state(reported: Vec<Device>, links: &[LinkReport]) -> BTreeMap<DeviceId, Arc<Device>> {
    let mut devices: BTreeMap<DeviceId, Device> = reported
        .into_iter()
        .map(|mut d| {
            if d.friendly_name.trim().is_empty() {
                d.friendly_name = d.id.to_string();
            }
            d.neighbors.remove(&d.id);
            (d.id.clone(), d)
        })
        .collect();

    for link in links {
        if link.source == link.target || !devices.contains_key(&link.target) {
            debug!(source = %link.source, target = %link.target, "skipping unusable link report");
            continue;
        }
        if let Some(device) = devices.get_mut(&link.source) {
            device.neighbors.insert(link.target.clone(), link.quality);
        }
    }

    devices
        .into_iter()
        .map(|(id, device)| (id, Arc::new(device)))
        .collect()
}
