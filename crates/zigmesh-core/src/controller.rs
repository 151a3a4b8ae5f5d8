// ── Controller abstraction ──
//
// Wires the gateway, the topology store, the state ingestor and the
// orchestrator together. One background task pumps bridge events: telemetry
// goes to the ingestor, everything else to the orchestrator.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::gateway::{BridgeEvent, BridgeEventStream, CommandGateway};
use crate::ingest::{IngestOutcome, StateIngestor, TelemetryEvent};
use crate::model::{Device, DeviceId, Snapshot};
use crate::operation::{
    Eviction, LogLevel, Operation, OperationHandle, OperationResult, Orchestrator,
};
use crate::route::{Route, resolve_route};
use crate::store::TopologyStore;
use crate::stream::SnapshotStream;

// ── LinkState ────────────────────────────────────────────────────────

/// State of the event subscription, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Stopped,
    /// Receiving events; no full state seen yet.
    Subscribed,
    /// A full state has been applied since the last (re)subscription.
    Synced,
    /// Subscription dropped; waiting to resubscribe.
    Resyncing { attempt: u32 },
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for adapters.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Reads never block;
/// operations resolve asynchronously through their handles.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    gateway: Arc<dyn CommandGateway>,
    store: Arc<TopologyStore>,
    orchestrator: Orchestrator,
    link_state: watch::Sender<LinkState>,
    /// Taken by the event pump on `start()`.
    ingest: Mutex<Option<(StateIngestor, mpsc::UnboundedReceiver<Eviction>)>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller. Does NOT subscribe to the bridge; call
    /// [`start()`](Self::start) for that.
    pub fn new(config: ControllerConfig, gateway: Arc<dyn CommandGateway>) -> Self {
        let store = Arc::new(TopologyStore::new(Snapshot::initial(
            config.coordinator.clone(),
        )));
        let (evictions_tx, evictions_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            config.orchestrator.clone(),
            evictions_tx,
        );
        let ingestor = StateIngestor::new(Arc::clone(&store));
        let (link_state, _) = watch::channel(LinkState::Stopped);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                gateway,
                store,
                orchestrator,
                link_state,
                ingest: Mutex::new(Some((ingestor, evictions_rx))),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<TopologyStore> {
        &self.inner.store
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Subscribe to the bridge and spawn the event pump.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ControllerStopped);
        }
        let Some((ingestor, evictions)) = self.inner.ingest.lock().await.take() else {
            return Err(CoreError::Internal("controller already started".into()));
        };

        let events = self.inner.gateway.subscribe();
        self.inner.link_state.send_replace(LinkState::Subscribed);

        let ctrl = self.clone();
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(event_pump_task(ctrl, ingestor, evictions, events)));

        if self.inner.config.sync_on_start {
            drop(self.issue(Operation::Rescan));
        }

        info!(coordinator = %self.inner.config.coordinator, "controller started");
        Ok(())
    }

    /// Stop the event pump and release every waiter.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.orchestrator.shutdown();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.link_state.send_replace(LinkState::Stopped);
        debug!("controller stopped");
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.current_snapshot()
    }

    pub fn find_device(&self, id: &DeviceId) -> Option<(Arc<Device>, Arc<Snapshot>)> {
        self.inner.store.find_device(id)
    }

    pub fn find_device_by_name(&self, name: &str) -> Option<(Arc<Device>, Arc<Snapshot>)> {
        self.inner.store.find_device_by_name(name)
    }

    /// Route from `id` to the coordinator over the current snapshot.
    pub fn resolve_route_to_coordinator(&self, id: &DeviceId) -> Route {
        resolve_route(&self.current_snapshot(), id)
    }

    // ── Operations ───────────────────────────────────────────────────

    pub fn issue(&self, operation: Operation) -> OperationHandle {
        self.inner.orchestrator.issue(operation)
    }

    /// Issue and wait for the terminal outcome, whatever it is.
    pub async fn execute(&self, operation: Operation) -> Result<OperationResult, CoreError> {
        self.issue(operation).wait().await
    }

    /// Issue, wait, and turn anything but success into an error.
    async fn run(&self, operation: Operation) -> Result<OperationResult, CoreError> {
        self.execute(operation).await?.into_result()
    }

    pub async fn rename(
        &self,
        device: &DeviceId,
        new_name: impl Into<String>,
    ) -> Result<OperationResult, CoreError> {
        self.run(Operation::Rename {
            device: device.clone(),
            new_name: new_name.into(),
        })
        .await
    }

    pub async fn configure(&self, device: &DeviceId) -> Result<OperationResult, CoreError> {
        self.run(Operation::Configure {
            device: device.clone(),
        })
        .await
    }

    pub async fn bind(
        &self,
        device: &DeviceId,
        target: impl Into<String>,
    ) -> Result<OperationResult, CoreError> {
        self.run(Operation::Bind {
            device: device.clone(),
            target: target.into(),
        })
        .await
    }

    pub async fn unbind(
        &self,
        device: &DeviceId,
        target: impl Into<String>,
    ) -> Result<OperationResult, CoreError> {
        self.run(Operation::Unbind {
            device: device.clone(),
            target: target.into(),
        })
        .await
    }

    /// With `force`, an unconfirmed removal evicts the device from the
    /// topology anyway and then resolves to
    /// [`RemovedLocally`](crate::Resolution::RemovedLocally). The eviction
    /// is committed by the time the result is returned.
    pub async fn remove(
        &self,
        device: &DeviceId,
        force: bool,
    ) -> Result<OperationResult, CoreError> {
        self.run(Operation::Remove {
            device: device.clone(),
            force,
        })
        .await
    }

    pub async fn permit_join(&self, enable: bool) -> Result<OperationResult, CoreError> {
        self.run(Operation::PermitJoin { enable }).await
    }

    pub async fn ota_update(&self, device: &DeviceId) -> Result<OperationResult, CoreError> {
        self.run(Operation::OtaUpdate {
            device: device.clone(),
        })
        .await
    }

    pub async fn set_log_level(&self, level: LogLevel) -> Result<OperationResult, CoreError> {
        self.run(Operation::SetLogLevel { level }).await
    }

    pub async fn trigger_rescan(&self) -> Result<OperationResult, CoreError> {
        self.run(Operation::Rescan).await
    }

    pub async fn reset_bridge(&self) -> Result<OperationResult, CoreError> {
        self.run(Operation::Reset).await
    }

    pub async fn touchlink_reset(&self) -> Result<OperationResult, CoreError> {
        self.run(Operation::TouchlinkReset).await
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn snapshots(&self) -> SnapshotStream {
        self.inner.store.subscribe()
    }

    /// Every operation resolution from now on.
    pub fn operations(&self) -> broadcast::Receiver<OperationResult> {
        self.inner.orchestrator.subscribe()
    }

    pub fn operation_history(&self) -> Vec<OperationResult> {
        self.inner.orchestrator.history()
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.inner.link_state.subscribe()
    }
}

// ── Event pump ───────────────────────────────────────────────────────

/// Sole consumer of bridge events and local evictions, and therefore the
/// sole driver of the ingestor.
async fn event_pump_task(
    ctrl: Controller,
    mut ingestor: StateIngestor,
    mut evictions: mpsc::UnboundedReceiver<Eviction>,
    mut events: BridgeEventStream,
) {
    let cancel = ctrl.inner.cancel.clone();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(eviction) = evictions.recv() => {
                let _ = ingestor.apply(eviction.event());
                eviction.applied();
            }
            next = events.next() => {
                if let Some(event) = next {
                    if ctrl.dispatch(&mut ingestor, &event) {
                        attempt = 0;
                    }
                    continue;
                }

                let reconnect = &ctrl.inner.config.reconnect;
                if reconnect.max_retries.is_some_and(|max| attempt >= max) {
                    error!(attempt, "event subscription lost, giving up");
                    break;
                }
                ctrl.inner.link_state.send_replace(LinkState::Resyncing { attempt });
                let delay = reconnect.backoff(attempt);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, delay_ms, "event subscription dropped");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;

                events = ctrl.inner.gateway.subscribe();
                info!(attempt, "resubscribed, requesting full state");
                drop(ctrl.inner.orchestrator.issue(Operation::Rescan));
            }
        }
    }

    ctrl.inner.link_state.send_replace(LinkState::Stopped);
    debug!("event pump exiting");
}

impl Controller {
    /// Route one bridge event. Returns `true` when it was a full state that
    /// got committed.
    fn dispatch(&self, ingestor: &mut StateIngestor, event: &BridgeEvent) -> bool {
        match TelemetryEvent::decode(event) {
            Some(Ok(telemetry)) => {
                let full = matches!(telemetry, TelemetryEvent::FullState { .. });
                let committed = matches!(
                    ingestor.apply(telemetry),
                    Ok(IngestOutcome::Committed { .. })
                );
                if full && committed {
                    self.inner.link_state.send_replace(LinkState::Synced);
                    return true;
                }
                false
            }
            Some(Err(err)) => {
                warn!(kind = %event.kind, error = %err, "undecodable telemetry");
                false
            }
            None => {
                self.inner.orchestrator.on_event(event);
                false
            }
        }
    }
}
