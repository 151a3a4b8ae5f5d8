//! CLI configuration: thin wrapper around `zigmesh_config`.
//!
//! Adds the flag overrides (`--config`, `--coordinator`) on top of the
//! shared loader.

use std::path::PathBuf;

use zigmesh_core::DeviceId;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use zigmesh_config::{Config, config_path, load_config_from, save_config_to};

/// Config file in effect: `--config` / `ZIGMESH_CONFIG`, else the platform default.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the config file (defaults when absent) and apply flag overrides.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = load_config_from(&resolve_path(global))?;
    if let Some(coordinator) = &global.coordinator {
        cfg.coordinator.clone_from(coordinator);
        cfg.validate()?;
    }
    Ok(cfg)
}

/// Coordinator the replay starts from.
pub fn coordinator(cfg: &Config) -> DeviceId {
    DeviceId::new(&cfg.coordinator)
}
