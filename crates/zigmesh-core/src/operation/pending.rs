// ── Pending operation bookkeeping ──
//
// Correlation keys, lifecycle states, and what callers get back once an
// operation resolves.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::{Operation, OperationKind};
use crate::error::CoreError;
use crate::gateway::BridgeEvent;
use crate::model::DeviceId;

// ── Keys ────────────────────────────────────────────────────────────

/// Identifies one attempt of one operation.
///
/// The epoch is process-wide and monotonic, so a retry gets a fresh key
/// even though kind and target are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationKey {
    pub kind: OperationKind,
    pub target: Option<DeviceId>,
    pub epoch: u64,
}

impl CorrelationKey {
    pub(crate) fn slot(&self) -> Slot {
        Slot {
            kind: self.kind,
            target: self.target.clone(),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}#{}", self.kind, target, self.epoch),
            None => write!(f, "{}:-#{}", self.kind, self.epoch),
        }
    }
}

/// At most one operation is in flight per slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Slot {
    pub kind: OperationKind,
    pub target: Option<DeviceId>,
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationState {
    Issued,
    AwaitingAck,
    Succeeded,
    Failed,
    TimedOut,
    /// Forced removal that the bridge never confirmed; evicted locally.
    RemovedLocally,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::RemovedLocally
        )
    }

    fn can_advance_to(self, next: Self) -> bool {
        match self {
            Self::Issued => matches!(next, Self::AwaitingAck | Self::Failed),
            Self::AwaitingAck => next.is_terminal(),
            _ => false,
        }
    }
}

/// Entry in the orchestrator's tracking table.
pub(crate) struct PendingOperation {
    pub key: CorrelationKey,
    pub operation: Operation,
    pub issued_at: DateTime<Utc>,
    pub deadline: Instant,
    pub attempts: u32,
    pub transaction: Option<String>,
    pub state: OperationState,
    pub waiters: Vec<oneshot::Sender<OperationResult>>,
    pub timer: Option<AbortHandle>,
}

impl PendingOperation {
    pub fn new(key: CorrelationKey, operation: Operation, deadline: Instant) -> Self {
        Self {
            key,
            operation,
            issued_at: Utc::now(),
            deadline,
            attempts: 1,
            transaction: None,
            state: OperationState::Issued,
            waiters: Vec::new(),
            timer: None,
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn advance(&mut self, next: OperationState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Whether `event`, processed at `now`, answers this attempt. The
    /// caller has already matched the slot.
    pub fn matches(&self, event: &BridgeEvent, now: Instant) -> bool {
        if self.state != OperationState::AwaitingAck || now > self.deadline {
            return false;
        }
        match (&self.transaction, &event.transaction) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }

    pub fn resolve(&self, resolution: Resolution) -> OperationResult {
        OperationResult {
            key: self.key.clone(),
            operation: self.operation.clone(),
            resolution,
            attempts: self.attempts,
            issued_at: self.issued_at,
            resolved_at: Utc::now(),
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Why an operation failed without timing out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum OperationFailure {
    #[error("unknown device {device}")]
    UnknownDevice { device: DeviceId },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("bridge rejected the command: {reason}")]
    BridgeRejected { reason: String },

    #[error("conflicts with in-flight {in_flight}")]
    Conflict { in_flight: CorrelationKey },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Terminal outcome of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Succeeded {
        #[serde(skip_serializing_if = "serde_json::Value::is_null")]
        payload: serde_json::Value,
    },
    Failed {
        failure: OperationFailure,
    },
    /// `ambiguous`: the bridge may still have applied the command.
    TimedOut {
        ambiguous: bool,
    },
    RemovedLocally,
}

impl Resolution {
    pub fn state(&self) -> OperationState {
        match self {
            Self::Succeeded { .. } => OperationState::Succeeded,
            Self::Failed { .. } => OperationState::Failed,
            Self::TimedOut { .. } => OperationState::TimedOut,
            Self::RemovedLocally => OperationState::RemovedLocally,
        }
    }
}

/// A resolved operation, as delivered to waiters and kept in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub key: CorrelationKey,
    pub operation: Operation,
    pub resolution: Resolution,
    /// Publishes made, retries included. Zero if never dispatched.
    pub attempts: u32,
    pub issued_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn state(&self) -> OperationState {
        self.resolution.state()
    }

    /// Succeeded, or removed locally as a forced removal asked for.
    pub fn is_success(&self) -> bool {
        matches!(
            self.resolution,
            Resolution::Succeeded { .. } | Resolution::RemovedLocally
        )
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.resolution, Resolution::TimedOut { ambiguous: true })
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        match &self.resolution {
            Resolution::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Map the outcome onto the crate error type, for `?`-style callers.
    pub fn into_result(self) -> Result<Self, CoreError> {
        let kind = self.key.kind;
        let err = match &self.resolution {
            Resolution::Succeeded { .. } | Resolution::RemovedLocally => return Ok(self),
            Resolution::TimedOut { ambiguous } => CoreError::Timeout {
                kind,
                target: self.key.target.clone(),
                ambiguous: *ambiguous,
            },
            Resolution::Failed { failure } => match failure {
                OperationFailure::UnknownDevice { device } => CoreError::DeviceNotFound {
                    identifier: device.to_string(),
                },
                OperationFailure::Transport { message } => CoreError::Transport {
                    message: message.clone(),
                },
                OperationFailure::BridgeRejected { reason } => CoreError::BridgeRejected {
                    kind,
                    reason: reason.clone(),
                },
                OperationFailure::Conflict { in_flight } => CoreError::OperationInFlight {
                    kind,
                    in_flight: in_flight.to_string(),
                },
                OperationFailure::InvalidRequest { message } => CoreError::ValidationFailed {
                    message: message.clone(),
                },
            },
        };
        Err(err)
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Caller's side of an issued operation.
///
/// Dropping it does not cancel anything: the operation still resolves and
/// is still recorded.
pub struct OperationHandle {
    key: CorrelationKey,
    state: HandleState,
}

enum HandleState {
    Ready(Box<OperationResult>),
    Waiting(oneshot::Receiver<OperationResult>),
    Stopped,
}

impl OperationHandle {
    pub(crate) fn ready(result: OperationResult) -> Self {
        Self {
            key: result.key.clone(),
            state: HandleState::Ready(Box::new(result)),
        }
    }

    pub(crate) fn waiting(key: CorrelationKey, rx: oneshot::Receiver<OperationResult>) -> Self {
        Self {
            key,
            state: HandleState::Waiting(rx),
        }
    }

    pub(crate) fn stopped(key: CorrelationKey) -> Self {
        Self {
            key,
            state: HandleState::Stopped,
        }
    }

    /// Key of the attempt this handle was attached to. A coalesced request
    /// shares the key of the operation it joined.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Whether the outcome was decided without dispatching.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Wait for the terminal outcome.
    ///
    /// Fails only if the controller shut down first.
    pub async fn wait(self) -> Result<OperationResult, CoreError> {
        match self.state {
            HandleState::Ready(result) => Ok(*result),
            HandleState::Waiting(rx) => rx.await.map_err(|_| CoreError::ControllerStopped),
            HandleState::Stopped => Err(CoreError::ControllerStopped),
        }
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn pending() -> PendingOperation {
        let key = CorrelationKey {
            kind: OperationKind::Rename,
            target: Some(DeviceId::new("0x1234")),
            epoch: 7,
        };
        let op = Operation::Rename {
            device: DeviceId::new("0x1234"),
            new_name: "lamp".into(),
        };
        PendingOperation::new(key, op, Instant::now() + Duration::from_secs(5))
    }

    #[test]
    fn key_display() {
        let p = pending();
        assert_eq!(p.key.to_string(), "rename:0x1234#7");
        let key = CorrelationKey {
            kind: OperationKind::Rescan,
            target: None,
            epoch: 1,
        };
        assert_eq!(key.to_string(), "rescan:-#1");
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        let mut p = pending();
        assert!(!p.advance(OperationState::Succeeded));
        assert!(p.advance(OperationState::AwaitingAck));
        assert!(p.advance(OperationState::TimedOut));
        // Resolved exactly once.
        assert!(!p.advance(OperationState::Succeeded));
        assert_eq!(p.state, OperationState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_respects_transaction_and_deadline() {
        let mut p = pending();
        p.advance(OperationState::AwaitingAck);
        p.transaction = Some("tx-1".into());

        let ack = BridgeEvent::ack(OperationKind::Rename, Some(DeviceId::new("0x1234")));
        assert!(p.matches(&ack, Instant::now()));
        let same = ack.clone().with_transaction("tx-1");
        let other = ack.clone().with_transaction("tx-2");
        assert!(p.matches(&same, Instant::now()));
        assert!(!p.matches(&other, Instant::now()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!p.matches(&ack, Instant::now()));
    }

    #[test]
    fn into_result_maps_failures() {
        let p = pending();
        let err = p
            .resolve(Resolution::Failed {
                failure: OperationFailure::BridgeRejected {
                    reason: "no such device".into(),
                },
            })
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::BridgeRejected {
                kind: OperationKind::Rename,
                ..
            }
        ));

        let err = p
            .resolve(Resolution::TimedOut { ambiguous: true })
            .into_result()
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { ambiguous: true, .. }));

        assert!(p.resolve(Resolution::RemovedLocally).into_result().is_ok());
    }

    #[tokio::test]
    async fn dropped_sender_means_stopped() {
        let (tx, rx) = oneshot::channel();
        let handle = OperationHandle::waiting(pending().key, rx);
        drop(tx);
        assert!(matches!(
            handle.wait().await,
            Err(CoreError::ControllerStopped)
        ));
    }
}
