// ── Operation orchestrator ──
//
// Publishes operations through the gateway, tracks each one in a table
// keyed by slot (kind + target), and resolves it exactly once: by a
// matching bridge response or by its deadline, whichever removes the
// entry first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pending::{PendingOperation, Slot};
use super::{
    CorrelationKey, Operation, OperationFailure, OperationHandle, OperationKind, OperationResult,
    OperationState, Resolution,
};
use crate::config::OrchestratorConfig;
use crate::gateway::{BridgeEvent, CommandGateway, GatewayError, OutboundCommand};
use crate::ingest::TelemetryEvent;
use crate::model::DeviceId;
use crate::store::TopologyStore;

const RESOLVED_CHANNEL_SIZE: usize = 256;

/// A device to drop from the topology because its forced removal went
/// unconfirmed.
///
/// The store writer applies [`Eviction::event`] and then calls
/// [`Eviction::applied`]; the removal resolves as `RemovedLocally` only
/// after that, or once the eviction is dropped unapplied.
#[derive(Debug)]
pub struct Eviction {
    pub device: DeviceId,
    applied: oneshot::Sender<()>,
}

impl Eviction {
    pub fn event(&self) -> TelemetryEvent {
        TelemetryEvent::DeviceRemoved {
            id: self.device.clone(),
        }
    }

    pub fn applied(self) {
        let _ = self.applied.send(());
    }
}

enum Retry {
    Scheduled,
    Exhausted,
    PublishFailed(GatewayError),
}

/// Tracks in-flight operations.
///
/// Cheaply cloneable via `Arc<OrchestratorInner>`. Deadline timers hold
/// only a weak reference, so dropping every clone tears the table down.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    gateway: Arc<dyn CommandGateway>,
    store: Arc<TopologyStore>,
    config: OrchestratorConfig,
    pending: DashMap<Slot, PendingOperation>,
    epoch: AtomicU64,
    history: Mutex<VecDeque<OperationResult>>,
    resolved: broadcast::Sender<OperationResult>,
    /// Forced removals are handed to the ingestor, the only store writer.
    evictions: mpsc::UnboundedSender<Eviction>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        store: Arc<TopologyStore>,
        config: OrchestratorConfig,
        evictions: mpsc::UnboundedSender<Eviction>,
    ) -> Self {
        let (resolved, _) = broadcast::channel(RESOLVED_CHANNEL_SIZE);
        Self {
            inner: Arc::new(OrchestratorInner {
                gateway,
                store,
                config,
                pending: DashMap::new(),
                epoch: AtomicU64::new(1),
                history: Mutex::new(VecDeque::new()),
                resolved,
                evictions,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // ── Issuing ──────────────────────────────────────────────────────

    /// Publish `operation` and start tracking it.
    ///
    /// Never blocks on the bridge. Must be called from within a Tokio
    /// runtime: the deadline timer is a spawned task.
    pub fn issue(&self, operation: Operation) -> OperationHandle {
        let kind = operation.kind();
        let target = operation.device().cloned();
        let key = self.next_key(kind, target.clone());

        if self.inner.cancel.is_cancelled() {
            return OperationHandle::stopped(key);
        }
        if let Some(failure) = self.precheck(&operation) {
            return self.reject(key, operation, failure, 0);
        }

        match self.inner.pending.entry(key.slot()) {
            Entry::Occupied(mut entry) => {
                let in_flight = entry.get_mut();
                if kind.is_idempotent() && in_flight.operation == operation {
                    let (tx, rx) = oneshot::channel();
                    in_flight.waiters.push(tx);
                    debug!(key = %in_flight.key, "coalesced onto in-flight operation");
                    return OperationHandle::waiting(in_flight.key.clone(), rx);
                }
                let conflicting = in_flight.key.clone();
                drop(entry);
                debug!(%key, in_flight = %conflicting, "slot busy, rejecting");
                self.reject(
                    key,
                    operation,
                    OperationFailure::Conflict {
                        in_flight: conflicting,
                    },
                    0,
                )
            }
            Entry::Vacant(entry) => {
                let command = OutboundCommand {
                    kind,
                    target,
                    payload: operation.payload(),
                };
                let deadline = Instant::now() + self.inner.config.timeouts.for_kind(kind);
                let mut pending = PendingOperation::new(key.clone(), operation, deadline);

                let transaction = match self.inner.gateway.publish(&command) {
                    Ok(transaction) => transaction,
                    Err(err) => {
                        drop(entry);
                        pending.advance(OperationState::Failed);
                        warn!(%key, error = %err, "publish failed");
                        let failure = OperationFailure::Transport {
                            message: err.to_string(),
                        };
                        return self.reject(key, pending.operation, failure, 1);
                    }
                };

                pending.transaction = transaction;
                pending.advance(OperationState::AwaitingAck);
                let (tx, rx) = oneshot::channel();
                pending.waiters.push(tx);
                pending.timer = Some(self.spawn_timer(key.clone(), deadline));
                entry.insert(pending);

                debug!(%key, "operation dispatched");
                OperationHandle::waiting(key, rx)
            }
        }
    }

    fn next_key(&self, kind: OperationKind, target: Option<DeviceId>) -> CorrelationKey {
        CorrelationKey {
            kind,
            target,
            epoch: self.inner.epoch.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Checks that resolve an operation before anything is published.
    fn precheck(&self, operation: &Operation) -> Option<OperationFailure> {
        let invalid = |message: &str| {
            Some(OperationFailure::InvalidRequest {
                message: message.to_owned(),
            })
        };

        match operation {
            Operation::Rename { new_name, .. } if new_name.trim().is_empty() => {
                return invalid("new name must not be empty");
            }
            Operation::Bind { target, .. } | Operation::Unbind { target, .. }
                if target.trim().is_empty() =>
            {
                return invalid("binding target must not be empty");
            }
            _ => {}
        }

        let device = operation.device()?;
        let snapshot = self.inner.store.current_snapshot();
        if !snapshot.contains(device) {
            return Some(OperationFailure::UnknownDevice {
                device: device.clone(),
            });
        }
        if matches!(operation, Operation::Remove { .. }) && snapshot.is_coordinator(device) {
            return invalid("the coordinator cannot be removed");
        }
        None
    }

    /// Resolve without tracking.
    fn reject(
        &self,
        key: CorrelationKey,
        operation: Operation,
        failure: OperationFailure,
        attempts: u32,
    ) -> OperationHandle {
        let now = chrono::Utc::now();
        let result = OperationResult {
            key,
            operation,
            resolution: Resolution::Failed { failure },
            attempts,
            issued_at: now,
            resolved_at: now,
        };
        self.record(result.clone());
        OperationHandle::ready(result)
    }

    // ── Deadlines ────────────────────────────────────────────────────

    fn spawn_timer(&self, key: CorrelationKey, deadline: Instant) -> AbortHandle {
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    if let Some(inner) = weak.upgrade() {
                        Orchestrator { inner }.on_deadline(&key);
                    }
                }
            }
        })
        .abort_handle()
    }

    fn on_deadline(&self, key: &CorrelationKey) {
        let retry = if key.kind.is_idempotent() {
            self.try_retry(key)
        } else {
            Retry::Exhausted
        };
        if matches!(retry, Retry::Scheduled) {
            return;
        }

        // Loses to a response that already removed this exact attempt.
        let Some((_, pending)) = self
            .inner
            .pending
            .remove_if(&key.slot(), |_, p| p.key == *key)
        else {
            return;
        };

        if let Retry::PublishFailed(err) = retry {
            let failure = OperationFailure::Transport {
                message: err.to_string(),
            };
            self.finish(pending, Resolution::Failed { failure });
        } else if pending.operation.is_forced_removal() {
            warn!(%key, "forced removal unconfirmed, evicting locally");
            self.evict(pending);
        } else {
            let ambiguous = !key.kind.is_idempotent();
            warn!(%key, attempts = pending.attempts, ambiguous, "operation timed out");
            self.finish(pending, Resolution::TimedOut { ambiguous });
        }
    }

    /// Re-publish an idempotent operation under a fresh key.
    ///
    /// The table entry is not held across `publish`; the attempt is
    /// re-checked afterwards and a retry that lost to a response is dropped.
    fn try_retry(&self, key: &CorrelationKey) -> Retry {
        let payload = match self.inner.pending.get(&key.slot()) {
            Some(pending)
                if pending.key == *key && pending.attempts <= self.inner.config.max_retries =>
            {
                pending.operation.payload()
            }
            _ => return Retry::Exhausted,
        };

        let command = OutboundCommand {
            kind: key.kind,
            target: key.target.clone(),
            payload,
        };
        let transaction = match self.inner.gateway.publish(&command) {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!(%key, error = %err, "retry publish failed");
                return Retry::PublishFailed(err);
            }
        };

        let Some(mut pending) = self.inner.pending.get_mut(&key.slot()) else {
            return Retry::Exhausted;
        };
        if pending.key != *key {
            return Retry::Exhausted;
        }
        let retry_key = self.next_key(key.kind, key.target.clone());
        let deadline = Instant::now() + self.inner.config.timeouts.for_kind(key.kind);
        pending.key = retry_key.clone();
        pending.attempts += 1;
        pending.transaction = transaction;
        pending.deadline = deadline;
        pending.timer = Some(self.spawn_timer(retry_key.clone(), deadline));

        info!(previous = %key, key = %retry_key, attempt = pending.attempts, "retrying operation");
        Retry::Scheduled
    }

    // ── Responses ────────────────────────────────────────────────────

    /// Offer a bridge event. Returns whether it resolved an operation.
    pub fn on_event(&self, event: &BridgeEvent) -> bool {
        let Ok(kind) = event.kind.parse::<OperationKind>() else {
            return false;
        };
        let slot = Slot {
            kind,
            target: event.target.clone(),
        };
        let now = Instant::now();

        let Some((_, mut pending)) = self
            .inner
            .pending
            .remove_if(&slot, |_, p| p.matches(event, now))
        else {
            debug!(
                kind = %event.kind,
                target = ?event.target,
                "response matches nothing in flight"
            );
            return false;
        };
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        let resolution = if event.is_success() {
            Resolution::Succeeded {
                payload: event.payload.clone(),
            }
        } else if pending.operation.is_forced_removal() {
            warn!(
                key = %pending.key,
                reason = %event.error_reason(),
                "forced removal rejected, evicting locally"
            );
            self.evict(pending);
            return true;
        } else {
            Resolution::Failed {
                failure: OperationFailure::BridgeRejected {
                    reason: event.error_reason(),
                },
            }
        };
        self.finish(pending, resolution);
        true
    }

    /// Queue the device for removal from the topology and resolve
    /// `RemovedLocally` once the store writer has applied it.
    fn evict(&self, pending: PendingOperation) {
        let Some(device) = pending.operation.device().cloned() else {
            self.finish(pending, Resolution::RemovedLocally);
            return;
        };
        let (applied, committed) = oneshot::channel();
        let eviction = Eviction {
            device: device.clone(),
            applied,
        };
        if self.inner.evictions.send(eviction).is_err() {
            warn!(%device, "ingestor gone, local eviction not applied");
            self.finish(pending, Resolution::RemovedLocally);
            return;
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if committed.await.is_err() {
                warn!(%device, "ingestor stopped before applying the eviction");
            }
            orchestrator.finish(pending, Resolution::RemovedLocally);
        });
    }

    // ── Resolution ───────────────────────────────────────────────────

    fn finish(&self, mut pending: PendingOperation, resolution: Resolution) {
        if !pending.advance(resolution.state()) {
            warn!(
                key = %pending.key,
                from = %pending.state,
                to = %resolution.state(),
                "refused lifecycle transition"
            );
            return;
        }
        let result = pending.resolve(resolution);
        debug!(key = %result.key, state = %result.state(), "operation resolved");

        for waiter in pending.waiters.drain(..) {
            // A dropped handle is fine; the result is still recorded.
            let _ = waiter.send(result.clone());
        }
        self.record(result);
    }

    fn record(&self, result: OperationResult) {
        {
            let mut history = self
                .inner
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if history.len() >= self.inner.config.history_capacity {
                history.pop_front();
            }
            if self.inner.config.history_capacity > 0 {
                history.push_back(result.clone());
            }
        }
        let _ = self.inner.resolved.send(result);
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Most recent resolutions, oldest first.
    pub fn history(&self) -> Vec<OperationResult> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Every resolution from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationResult> {
        self.inner.resolved.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Key of the attempt currently occupying a slot.
    pub fn in_flight(
        &self,
        kind: OperationKind,
        target: Option<&DeviceId>,
    ) -> Option<CorrelationKey> {
        let slot = Slot {
            kind,
            target: target.cloned(),
        };
        self.inner.pending.get(&slot).map(|p| p.key.clone())
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop every timer and drop all tracked operations. Their waiters see
    /// `ControllerStopped`.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let dropped = self.inner.pending.len();
        self.inner.pending.retain(|_, pending| {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            false
        });
        if dropped > 0 {
            info!(dropped, "orchestrator stopped with operations in flight");
        }
    }
}
