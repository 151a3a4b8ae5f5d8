// ── Topology store ──
//
// Single-writer, many-reader holder of the current snapshot. Reads are
// wait-free `ArcSwap` loads; commits swap the whole snapshot and push it
// to `watch` subscribers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::trace;

use crate::error::CoreError;
use crate::model::{Device, DeviceId, Snapshot};
use crate::stream::SnapshotStream;

/// Authoritative owner of the device/link graph.
///
/// Only the [`StateIngestor`](crate::ingest::StateIngestor) commits; every
/// other component reads `Arc<Snapshot>` values that never change under it.
pub struct TopologyStore {
    current: ArcSwap<Snapshot>,
    changes: watch::Sender<Arc<Snapshot>>,
}

impl TopologyStore {
    pub fn new(initial: Snapshot) -> Self {
        let initial = Arc::new(initial);
        let (changes, _) = watch::channel(Arc::clone(&initial));
        Self {
            current: ArcSwap::new(initial),
            changes,
        }
    }

    /// The latest committed snapshot. Never blocks.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Atomically replace the current snapshot.
    ///
    /// `next` must carry a higher version than the snapshot it replaces;
    /// a commit that lost a race or replays an old version is refused.
    pub fn commit(&self, next: Snapshot) -> Result<Arc<Snapshot>, CoreError> {
        let current = self.current.load_full();
        if next.version() <= current.version() {
            return Err(CoreError::StaleSnapshot {
                current: current.version(),
                attempted: next.version(),
            });
        }

        let next = Arc::new(next);
        let previous = self.current.compare_and_swap(&current, Arc::clone(&next));
        if !Arc::ptr_eq(&previous, &current) {
            return Err(CoreError::StaleSnapshot {
                current: previous.version(),
                attempted: next.version(),
            });
        }

        // `send_replace` updates unconditionally, even with zero receivers.
        self.changes.send_replace(Arc::clone(&next));
        trace!(version = next.version(), "snapshot committed");
        Ok(next)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// A device together with the snapshot it was read from.
    pub fn find_device(&self, id: &DeviceId) -> Option<(Arc<Device>, Arc<Snapshot>)> {
        let snapshot = self.current_snapshot();
        let device = Arc::clone(snapshot.device(id)?);
        Some((device, snapshot))
    }

    pub fn find_device_by_name(&self, name: &str) -> Option<(Arc<Device>, Arc<Snapshot>)> {
        let snapshot = self.current_snapshot();
        let device = Arc::clone(snapshot.find_by_name(name)?);
        Some((device, snapshot))
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.changes.subscribe())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::DeviceKind;

    fn coordinator() -> DeviceId {
        DeviceId::new("0x0000")
    }

    fn snapshot_with(version: u64, extra: &[&str]) -> Snapshot {
        let mut devices = BTreeMap::new();
        devices.insert(
            coordinator(),
            Arc::new(Device::new(coordinator(), "coord", DeviceKind::Coordinator)),
        );
        for id in extra {
            devices.insert(
                DeviceId::new(*id),
                Arc::new(Device::new(*id, *id, DeviceKind::Router)),
            );
        }
        Snapshot::build(version, coordinator(), devices).unwrap()
    }

    #[test]
    fn commit_replaces_current_snapshot() {
        let store = TopologyStore::new(Snapshot::initial(coordinator()));
        let before = store.current_snapshot();

        store.commit(snapshot_with(1, &["0x1234"])).unwrap();

        let after = store.current_snapshot();
        assert_eq!(after.version(), 1);
        assert!(after.contains(&DeviceId::new("0x1234")));
        // Readers holding the old snapshot are unaffected.
        assert!(!before.contains(&DeviceId::new("0x1234")));
    }

    #[test]
    fn commit_refuses_stale_version() {
        let store = TopologyStore::new(Snapshot::initial(coordinator()));
        store.commit(snapshot_with(2, &[])).unwrap();

        let err = store.commit(snapshot_with(2, &["0x1234"])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::StaleSnapshot {
                current: 2,
                attempted: 2
            }
        ));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn find_device_returns_enclosing_snapshot() {
        let store = TopologyStore::new(Snapshot::initial(coordinator()));
        store.commit(snapshot_with(1, &["0x1234"])).unwrap();

        let (device, snapshot) = store.find_device(&DeviceId::new("0x1234")).unwrap();
        assert_eq!(device.id.as_str(), "0x1234");
        assert_eq!(snapshot.version(), 1);
        assert!(store.find_device(&DeviceId::new("0xffff")).is_none());
    }

    #[tokio::test]
    async fn subscribers_see_each_commit() {
        let store = TopologyStore::new(Snapshot::initial(coordinator()));
        let mut stream = store.subscribe();
        assert_eq!(stream.current().version(), 0);

        store.commit(snapshot_with(1, &["0x1234"])).unwrap();

        let next = stream.changed().await.unwrap();
        assert_eq!(next.version(), 1);
        assert_eq!(stream.latest().version(), 1);
    }
}
