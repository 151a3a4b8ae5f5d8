// ── Reactive snapshot stream ──
//
// Subscription type for consuming topology changes from the store.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Snapshot;

/// A subscription to committed topology snapshots.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting into a `Stream`.
pub struct SnapshotStream {
    current: Arc<Snapshot>,
    receiver: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Snapshot>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &Arc<Snapshot> {
        &self.current
    }

    /// The latest committed snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next commit, returning the new snapshot.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Wait until a committed snapshot satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Option<Arc<Snapshot>> {
        let snap = self
            .receiver
            .wait_for(|snap| predicate(snap))
            .await
            .ok()?
            .clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each committed snapshot.
pub struct SnapshotWatchStream {
    inner: WatchStream<Arc<Snapshot>>,
}

impl Stream for SnapshotWatchStream {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    use super::*;
    use crate::model::DeviceId;
    use crate::store::TopologyStore;

    fn store() -> TopologyStore {
        TopologyStore::new(Snapshot::initial(DeviceId::new("0x0000")))
    }

    fn bump(store: &TopologyStore) {
        let current = store.current_snapshot();
        let next = Snapshot::build(
            current.version() + 1,
            current.coordinator_id().clone(),
            current.device_map().clone(),
        )
        .unwrap();
        store.commit(next).unwrap();
    }

    #[test]
    fn changed_waits_for_the_next_commit() {
        let store = store();
        let mut snapshots = store.subscribe();

        {
            let mut changed = task::spawn(snapshots.changed());
            assert_pending!(changed.poll());

            bump(&store);
            assert!(changed.is_woken());
            let snap = assert_ready!(changed.poll()).unwrap();
            assert_eq!(snap.version(), 1);
        }

        assert_eq!(snapshots.current().version(), 1);
    }

    #[test]
    fn stream_yields_current_then_each_commit() {
        let store = store();
        let mut stream = task::spawn(store.subscribe().into_stream());

        assert_ready_eq!(stream.poll_next().map(|s| s.map(|s| s.version())), Some(0));
        assert_pending!(stream.poll_next());

        bump(&store);
        assert_ready_eq!(stream.poll_next().map(|s| s.map(|s| s.version())), Some(1));
    }
}
