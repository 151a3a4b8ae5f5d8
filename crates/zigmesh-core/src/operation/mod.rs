// ── Operation API ──
//
// Every operator-initiated write flows through the `Operation` enum. The
// orchestrator publishes it, tracks it, and resolves it exactly once.

mod orchestrator;
mod pending;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::model::DeviceId;

pub use orchestrator::{Eviction, Orchestrator};
pub use pending::{
    CorrelationKey, OperationFailure, OperationHandle, OperationResult, OperationState, Resolution,
};

// ── OperationKind ────────────────────────────────────────────────────

/// Kind of command. Its snake_case name is also the `kind` the bridge
/// uses when responding.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Rename,
    Configure,
    Bind,
    Unbind,
    Remove,
    PermitJoin,
    OtaUpdate,
    SetLogLevel,
    Rescan,
    Reset,
    TouchlinkReset,
}

impl OperationKind {
    /// Safe to re-send when the outcome is unknown.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Self::PermitJoin | Self::Rescan | Self::SetLogLevel)
    }

    /// Whether the operation acts on a specific paired device.
    pub fn targets_device(self) -> bool {
        matches!(
            self,
            Self::Rename
                | Self::Configure
                | Self::Bind
                | Self::Unbind
                | Self::Remove
                | Self::OtaUpdate
        )
    }
}

// ── LogLevel ─────────────────────────────────────────────────────────

/// Bridge log verbosity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    Info,
    #[strum(to_string = "warn", serialize = "warning")]
    Warn,
    Error,
}

// ── Operation ────────────────────────────────────────────────────────

/// An operator command with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Rename { device: DeviceId, new_name: String },
    Configure { device: DeviceId },
    /// `target` is a device identity or a group name.
    Bind { device: DeviceId, target: String },
    Unbind { device: DeviceId, target: String },
    /// `force` evicts the device locally even if the bridge never answers.
    Remove { device: DeviceId, force: bool },
    PermitJoin { enable: bool },
    OtaUpdate { device: DeviceId },
    SetLogLevel { level: LogLevel },
    Rescan,
    Reset,
    TouchlinkReset,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Rename { .. } => OperationKind::Rename,
            Self::Configure { .. } => OperationKind::Configure,
            Self::Bind { .. } => OperationKind::Bind,
            Self::Unbind { .. } => OperationKind::Unbind,
            Self::Remove { .. } => OperationKind::Remove,
            Self::PermitJoin { .. } => OperationKind::PermitJoin,
            Self::OtaUpdate { .. } => OperationKind::OtaUpdate,
            Self::SetLogLevel { .. } => OperationKind::SetLogLevel,
            Self::Rescan => OperationKind::Rescan,
            Self::Reset => OperationKind::Reset,
            Self::TouchlinkReset => OperationKind::TouchlinkReset,
        }
    }

    /// The device the operation acts on, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Rename { device, .. }
            | Self::Configure { device }
            | Self::Bind { device, .. }
            | Self::Unbind { device, .. }
            | Self::Remove { device, .. }
            | Self::OtaUpdate { device } => Some(device),
            Self::PermitJoin { .. }
            | Self::SetLogLevel { .. }
            | Self::Rescan
            | Self::Reset
            | Self::TouchlinkReset => None,
        }
    }

    pub fn is_forced_removal(&self) -> bool {
        matches!(self, Self::Remove { force: true, .. })
    }

    /// Request body handed to the gateway.
    pub fn payload(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            Self::Rename { device, new_name } => json!({ "from": device, "to": new_name }),
            Self::Bind { device, target } | Self::Unbind { device, target } => {
                json!({ "from": device, "to": target })
            }
            Self::Remove { device, force } => json!({ "id": device, "force": force }),
            Self::Configure { device } | Self::OtaUpdate { device } => json!({ "id": device }),
            Self::PermitJoin { enable } => json!({ "value": enable }),
            Self::SetLogLevel { level } => json!({ "value": level }),
            Self::Rescan | Self::Reset | Self::TouchlinkReset => json!({}),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn kind_names_match_bridge_responses() {
        assert_eq!(OperationKind::PermitJoin.to_string(), "permit_join");
        assert_eq!(
            "ota_update".parse::<OperationKind>().unwrap(),
            OperationKind::OtaUpdate
        );
        assert!("device_announced".parse::<OperationKind>().is_err());
    }

    #[test]
    fn only_toggles_and_triggers_are_idempotent() {
        let idempotent: Vec<_> = OperationKind::iter()
            .filter(|k| k.is_idempotent())
            .collect();
        assert_eq!(
            idempotent,
            vec![
                OperationKind::PermitJoin,
                OperationKind::SetLogLevel,
                OperationKind::Rescan
            ]
        );
    }

    #[test]
    fn device_matches_targets_device() {
        let ops = [
            Operation::Rename {
                device: "0x1".into(),
                new_name: "a".into(),
            },
            Operation::Bind {
                device: "0x1".into(),
                target: "0x2".into(),
            },
            Operation::PermitJoin { enable: true },
            Operation::SetLogLevel {
                level: LogLevel::Debug,
            },
            Operation::TouchlinkReset,
        ];
        for op in ops {
            assert_eq!(op.device().is_some(), op.kind().targets_device(), "{op:?}");
        }
    }

    #[test]
    fn payloads_carry_parameters() {
        let op = Operation::Remove {
            device: "0xDEAD".into(),
            force: true,
        };
        assert_eq!(
            op.payload(),
            serde_json::json!({ "id": "0xdead", "force": true })
        );

        let op = Operation::SetLogLevel {
            level: LogLevel::Warn,
        };
        assert_eq!(op.payload(), serde_json::json!({ "value": "warn" }));
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    }
}
