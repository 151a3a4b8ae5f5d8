// ── Runtime controller configuration ──
//
// These types describe *how* the controller behaves: deadlines, retries,
// history depth and resubscription backoff. They never touch disk; the
// CLI (via zigmesh-config) builds a `ControllerConfig` and hands it in.

use std::time::Duration;

use crate::model::DeviceId;
use crate::operation::OperationKind;

/// Identity assumed for the coordinator until the bridge reports one.
pub const DEFAULT_COORDINATOR: &str = "0x0000000000000000";

/// Top-level configuration for a [`Controller`](crate::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub coordinator: DeviceId,
    pub orchestrator: OrchestratorConfig,
    pub reconnect: ReconnectConfig,
    /// Request a full re-sync (rescan) right after `start()`.
    pub sync_on_start: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            coordinator: DeviceId::new(DEFAULT_COORDINATOR),
            orchestrator: OrchestratorConfig::default(),
            reconnect: ReconnectConfig::default(),
            sync_on_start: false,
        }
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub timeouts: OperationTimeouts,
    /// Extra attempts for idempotent operations that time out.
    pub max_retries: u32,
    /// Resolved operations kept for `operation_history()`.
    pub history_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: OperationTimeouts::default(),
            max_retries: 1,
            history_capacity: 256,
        }
    }
}

/// Acknowledgement deadline per operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub rename: Duration,
    pub configure: Duration,
    pub bind: Duration,
    pub unbind: Duration,
    pub remove: Duration,
    pub permit_join: Duration,
    pub ota_update: Duration,
    pub set_log_level: Duration,
    pub rescan: Duration,
    pub reset: Duration,
    pub touchlink_reset: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            rename: Duration::from_secs(5),
            configure: Duration::from_secs(30),
            bind: Duration::from_secs(10),
            unbind: Duration::from_secs(10),
            remove: Duration::from_secs(10),
            permit_join: Duration::from_secs(5),
            ota_update: Duration::from_secs(10 * 60),
            set_log_level: Duration::from_secs(5),
            rescan: Duration::from_secs(60),
            reset: Duration::from_secs(30),
            touchlink_reset: Duration::from_secs(60),
        }
    }
}

impl OperationTimeouts {
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        *self.slot(kind)
    }

    pub fn set(&mut self, kind: OperationKind, timeout: Duration) {
        *self.slot_mut(kind) = timeout;
    }

    fn slot(&self, kind: OperationKind) -> &Duration {
        match kind {
            OperationKind::Rename => &self.rename,
            OperationKind::Configure => &self.configure,
            OperationKind::Bind => &self.bind,
            OperationKind::Unbind => &self.unbind,
            OperationKind::Remove => &self.remove,
            OperationKind::PermitJoin => &self.permit_join,
            OperationKind::OtaUpdate => &self.ota_update,
            OperationKind::SetLogLevel => &self.set_log_level,
            OperationKind::Rescan => &self.rescan,
            OperationKind::Reset => &self.reset,
            OperationKind::TouchlinkReset => &self.touchlink_reset,
        }
    }

    fn slot_mut(&mut self, kind: OperationKind) -> &mut Duration {
        match kind {
            OperationKind::Rename => &mut self.rename,
            OperationKind::Configure => &mut self.configure,
            OperationKind::Bind => &mut self.bind,
            OperationKind::Unbind => &mut self.unbind,
            OperationKind::Remove => &mut self.remove,
            OperationKind::PermitJoin => &mut self.permit_join,
            OperationKind::OtaUpdate => &mut self.ota_update,
            OperationKind::SetLogLevel => &mut self.set_log_level,
            OperationKind::Rescan => &mut self.rescan,
            OperationKind::Reset => &mut self.reset,
            OperationKind::TouchlinkReset => &mut self.touchlink_reset,
        }
    }
}

// ── Resubscription ──────────────────────────────────────────────────

/// Exponential backoff for re-establishing a dropped event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// `delay = min(initial * 2^attempt, max)` with +-25% jitter.
    ///
    /// The jitter is derived from the attempt number, so the sequence is
    /// reproducible.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = base.min(self.max_delay);

        let jitter = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        capped.mul_f64(jitter.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_deadlines() {
        let timeouts = OperationTimeouts::default();
        assert_eq!(
            timeouts.for_kind(OperationKind::Rename),
            Duration::from_secs(5)
        );
        assert_eq!(
            timeouts.for_kind(OperationKind::OtaUpdate),
            Duration::from_secs(600)
        );
        assert_eq!(
            timeouts.for_kind(OperationKind::Rescan),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn set_overrides_one_kind() {
        let mut timeouts = OperationTimeouts::default();
        timeouts.set(OperationKind::Bind, Duration::from_secs(3));
        assert_eq!(
            timeouts.for_kind(OperationKind::Bind),
            Duration::from_secs(3)
        );
        assert_eq!(
            timeouts.for_kind(OperationKind::Unbind),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();
        let d0 = config.backoff(0);
        let d1 = config.backoff(1);
        let d2 = config.backoff(2);
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig::default();
        let ceiling = config.max_delay.mul_f64(1.25);
        assert!(config.backoff(20) <= ceiling);
    }
}
