// ── Command gateway ──
//
// The only seam between the core and the bridge transport. The core
// publishes `OutboundCommand`s and consumes `BridgeEvent`s; how they are
// encoded on the wire is the gateway's business.

mod loopback;

use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DeviceId;
use crate::operation::OperationKind;

pub use loopback::LoopbackGateway;

/// Infinite, non-restartable sequence of bridge events. When it ends the
/// subscription is gone and must be re-established.
pub type BridgeEventStream = Pin<Box<dyn Stream<Item = BridgeEvent> + Send>>;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("bridge gateway is disconnected")]
    Disconnected,

    #[error("publish failed: {0}")]
    Publish(String),
}

// ── Outbound ────────────────────────────────────────────────────────

/// A command handed to the gateway for delivery to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundCommand {
    pub kind: OperationKind,
    pub target: Option<DeviceId>,
    pub payload: serde_json::Value,
}

// ── Inbound ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Ok,
    Error,
}

/// One message from the bridge: telemetry or a command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    /// Telemetry kind (`"device_announced"`, ...) or the operation kind a
    /// response answers (`"rename"`, `"permit_join"`, ...).
    pub kind: String,
    #[serde(default)]
    pub target: Option<DeviceId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub status: EventStatus,
    /// Native correlation token, when the bridge echoes one.
    #[serde(default)]
    pub transaction: Option<String>,
}

impl BridgeEvent {
    pub fn new(
        kind: impl Into<String>,
        target: Option<DeviceId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            target,
            payload,
            status: EventStatus::Ok,
            transaction: None,
        }
    }

    /// Positive response to an operation.
    pub fn ack(kind: OperationKind, target: Option<DeviceId>) -> Self {
        Self::new(kind.to_string(), target, serde_json::Value::Null)
    }

    /// Negative response to an operation.
    pub fn rejection(kind: OperationKind, target: Option<DeviceId>, reason: &str) -> Self {
        Self {
            status: EventStatus::Error,
            ..Self::new(kind.to_string(), target, serde_json::json!({ "error": reason }))
        }
    }

    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = Some(transaction.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == EventStatus::Ok
    }

    /// Human-readable failure reason carried by a negative response.
    pub fn error_reason(&self) -> String {
        match self.payload.get("error") {
            Some(serde_json::Value::String(reason)) => reason.clone(),
            Some(other) => other.to_string(),
            None if self.payload.is_null() => "no reason given".into(),
            None => self.payload.to_string(),
        }
    }
}

// ── Gateway contract ────────────────────────────────────────────────

/// Transport to the bridge.
///
/// `publish` only hands the command over; it never waits for the bridge to
/// act on it. Responses arrive later on the subscription.
pub trait CommandGateway: Send + Sync + 'static {
    /// Returns the native correlation handle, if the transport has one.
    ///
    /// Called while the orchestrator holds the operation's table entry, so
    /// it must not block or await I/O: enqueue the command (a channel to a
    /// writer task, say) and return. It must not call back into the
    /// orchestrator either.
    fn publish(&self, command: &OutboundCommand) -> Result<Option<String>, GatewayError>;

    fn subscribe(&self) -> BridgeEventStream;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bridge_event_defaults_when_deserializing() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{ "kind": "permit_join" }"#).unwrap();
        assert!(event.is_success());
        assert!(event.target.is_none());
        assert!(event.payload.is_null());
    }

    #[test]
    fn rejection_carries_reason() {
        let event = BridgeEvent::rejection(
            OperationKind::Bind,
            Some(DeviceId::new("0x1234")),
            "Failed to bind: timeout",
        );
        assert!(!event.is_success());
        assert_eq!(event.kind, "bind");
        assert_eq!(event.error_reason(), "Failed to bind: timeout");
    }
}
