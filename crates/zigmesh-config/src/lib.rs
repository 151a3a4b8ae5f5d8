//! Shared configuration for zigmesh tools.
//!
//! TOML file + `ZIGMESH_` environment overrides, validated and translated
//! into `zigmesh_core::ControllerConfig`. The core never reads files; this
//! crate is the only place that does.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zigmesh_core::config::DEFAULT_COORDINATOR;
use zigmesh_core::{ControllerConfig, DeviceId, OperationKind, OrchestratorConfig, ReconnectConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator identity assumed until the bridge reports one.
    pub coordinator: String,

    /// Default `tracing` filter for the CLI (`RUST_LOG` wins).
    pub log_level: String,

    /// Ask the bridge for a full state as soon as the controller starts.
    pub sync_on_start: bool,

    pub operations: Operations,

    pub reconnect: Reconnect,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: DEFAULT_COORDINATOR.into(),
            log_level: "warn".into(),
            sync_on_start: false,
            operations: Operations::default(),
            reconnect: Reconnect::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Operations {
    /// Re-sends allowed for idempotent operations that time out.
    pub max_retries: u32,

    /// Resolved operations kept for inspection.
    pub history_capacity: usize,

    /// Per-kind deadline overrides (`rename = "3s"`, `ota_update = "20m"`).
    /// Kinds not listed keep their built-in deadline.
    pub timeouts: BTreeMap<OperationKind, String>,
}

impl Default for Operations {
    fn default() -> Self {
        let core = OrchestratorConfig::default();
        Self {
            max_retries: core.max_retries,
            history_capacity: core.history_capacity,
            timeouts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Reconnect {
    pub initial_delay: String,
    pub max_delay: String,
    /// Omit to retry forever.
    pub max_retries: Option<u32>,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            initial_delay: "1s".into(),
            max_delay: "30s".into(),
            max_retries: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "zigmesh", "zigmesh").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("zigmesh");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: defaults, then the TOML file, then `ZIGMESH_*`.
///
/// Nested keys use a double underscore:
/// `ZIGMESH_OPERATIONS__TIMEOUTS__RENAME=3s`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ZIGMESH_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file means defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if anything goes wrong.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Check everything `to_controller_config` would reject.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_controller_config().map(|_| ())
    }

    /// Build the runtime configuration for `zigmesh_core::Controller`.
    pub fn to_controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let coordinator = DeviceId::new(&self.coordinator);
        if coordinator.is_empty() {
            return Err(invalid("coordinator", "must not be empty"));
        }

        let mut orchestrator = OrchestratorConfig {
            max_retries: self.operations.max_retries,
            history_capacity: self.operations.history_capacity,
            ..OrchestratorConfig::default()
        };
        for (kind, raw) in &self.operations.timeouts {
            let timeout = parse_duration(&format!("operations.timeouts.{kind}"), raw)?;
            orchestrator.timeouts.set(*kind, timeout);
        }

        let reconnect = ReconnectConfig {
            initial_delay: parse_duration(
                "reconnect.initial_delay",
                &self.reconnect.initial_delay,
            )?,
            max_delay: parse_duration("reconnect.max_delay", &self.reconnect.max_delay)?,
            max_retries: self.reconnect.max_retries,
        };
        if reconnect.initial_delay > reconnect.max_delay {
            return Err(invalid(
                "reconnect.initial_delay",
                format!(
                    "{} exceeds max_delay {}",
                    self.reconnect.initial_delay, self.reconnect.max_delay
                ),
            ));
        }

        Ok(ControllerConfig {
            coordinator,
            orchestrator,
            reconnect,
            sync_on_start: self.sync_on_start,
        })
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|e| invalid(field, format!("'{raw}': {e}")))?;
    if duration.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(duration)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_translate_to_core_defaults() {
        let core = Config::default().to_controller_config().unwrap();
        assert_eq!(core, ControllerConfig::default());
    }

    #[test]
    fn timeout_overrides_apply_per_kind() {
        let mut cfg = Config::default();
        cfg.operations
            .timeouts
            .insert(OperationKind::OtaUpdate, "20m".into());
        let core = cfg.to_controller_config().unwrap();
        assert_eq!(
            core.orchestrator.timeouts.for_kind(OperationKind::OtaUpdate),
            Duration::from_secs(20 * 60)
        );
        assert_eq!(
            core.orchestrator.timeouts.for_kind(OperationKind::Rename),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn zero_and_garbage_durations_are_rejected() {
        let mut cfg = Config::default();
        cfg.operations.timeouts.insert(OperationKind::Bind, "0s".into());
        assert!(matches!(
            cfg.to_controller_config(),
            Err(ConfigError::Validation { .. })
        ));

        let mut cfg = Config::default();
        cfg.reconnect.max_delay = "soon".into();
        let err = cfg.to_controller_config().unwrap_err();
        assert!(err.to_string().contains("reconnect.max_delay"));
    }

    #[test]
    fn backoff_bounds_must_be_ordered() {
        let mut cfg = Config::default();
        cfg.reconnect.initial_delay = "1m".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_coordinator_is_rejected() {
        let cfg = Config {
            coordinator: "  ".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
