// ── Core error types ──
//
// User-facing errors from zigmesh-core. Consumers never see gateway
// internals directly: the `From<GatewayError>` impl folds transport
// failures into `CoreError::Transport`.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::model::DeviceId;
use crate::operation::OperationKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Could not publish command: {message}")]
    Transport { message: String },

    #[error("Bridge rejected {kind}: {reason}")]
    BridgeRejected { kind: OperationKind, reason: String },

    #[error("{kind} timed out waiting for the bridge{}", ambiguity_note(.ambiguous))]
    Timeout {
        kind: OperationKind,
        target: Option<DeviceId>,
        /// The bridge may or may not have applied the command.
        ambiguous: bool,
    },

    #[error("Another {kind} is already in flight ({in_flight})")]
    OperationInFlight {
        kind: OperationKind,
        in_flight: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Topology errors ──────────────────────────────────────────────
    #[error("Malformed telemetry: {reason}")]
    MalformedTelemetry { reason: String },

    #[error("Stale snapshot: version {attempted} does not follow {current}")]
    StaleSnapshot { current: u64, attempted: u64 },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Controller stopped")]
    ControllerStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTelemetry {
            reason: reason.into(),
        }
    }
}

fn ambiguity_note(ambiguous: &bool) -> &'static str {
    if *ambiguous {
        " (outcome unknown: the command may still have been applied)"
    } else {
        ""
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        CoreError::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_timeout_says_so() {
        let err = CoreError::Timeout {
            kind: OperationKind::Bind,
            target: Some(DeviceId::new("0x1234")),
            ambiguous: true,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("bind timed out"));
        assert!(msg.contains("outcome unknown"));
    }

    #[test]
    fn plain_timeout_has_no_note() {
        let err = CoreError::Timeout {
            kind: OperationKind::PermitJoin,
            target: None,
            ambiguous: false,
        };
        assert_eq!(
            err.to_string(),
            "permit_join timed out waiting for the bridge"
        );
    }

    #[test]
    fn gateway_error_becomes_transport() {
        let err = CoreError::from(GatewayError::Disconnected);
        assert!(matches!(err, CoreError::Transport { .. }));
    }
}
