//! Topology tracking and command orchestration for a Zigbee-to-MQTT bridge.
//!
//! The crate sits between a bridge transport ([`CommandGateway`]) and operator
//! front ends (CLI, HTTP, chat bots):
//!
//! - **[`Controller`]**: Central facade. [`start()`](Controller::start)
//!   subscribes to the bridge and spawns the event pump; typed helpers
//!   (`rename`, `bind`, `remove`, `permit_join`, ...) issue operations and
//!   await their outcome.
//!
//! - **[`TopologyStore`]**: Single-writer, many-reader holder of the current
//!   [`Snapshot`] (`arc-swap` + `tokio::sync::watch`). A reader never sees a
//!   half-applied update.
//!
//! - **[`StateIngestor`]**: Folds [`TelemetryEvent`]s, in order, into new
//!   snapshots. It is the only component that commits.
//!
//! - **[`Orchestrator`]**: Tracks in-flight operations by correlation key,
//!   matches bridge responses, enforces per-kind deadlines and retries, and
//!   resolves every operation exactly once.
//!
//! - **[`resolve_route`]**: Cheapest path from a device back to the
//!   coordinator, weighted by inverse link quality.

pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod operation;
pub mod route;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, OperationTimeouts, OrchestratorConfig, ReconnectConfig};
pub use controller::{Controller, LinkState};
pub use error::CoreError;
pub use gateway::{
    BridgeEvent, BridgeEventStream, CommandGateway, EventStatus, GatewayError, LoopbackGateway,
    OutboundCommand,
};
pub use ingest::{IngestOutcome, IngestStats, LinkReport, StateIngestor, TelemetryEvent};
pub use model::{Device, DeviceId, DeviceKind, Link, Snapshot};
pub use operation::{
    CorrelationKey, Eviction, LogLevel, Operation, OperationFailure, OperationHandle,
    OperationKind, OperationResult, OperationState, Orchestrator, Resolution,
};
pub use route::{Route, link_cost, resolve_route};
pub use store::TopologyStore;
pub use stream::{SnapshotStream, SnapshotWatchStream};
