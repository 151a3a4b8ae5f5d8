//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod devices;
pub mod links;
pub mod route;
pub mod snapshot;

use std::sync::Arc;

use zigmesh_core::{CoreError, Device, DeviceId, Snapshot};

use crate::cli::CaptureArgs;
use crate::config::{self, Config};
use crate::error::CliError;
use crate::replay::{self, Replay};

/// Replay a capture, warning once about anything skipped.
pub fn load(args: &CaptureArgs, cfg: &Config) -> Result<Replay, CliError> {
    let coordinator = config::coordinator(cfg);
    tracing::debug!(capture = %args.capture.display(), %coordinator, "replaying capture");
    let replay = replay::run(args, coordinator)?;
    let skipped = replay.stats.skipped();
    if skipped > 0 {
        tracing::warn!(
            skipped,
            capture = %args.capture.display(),
            "some capture lines were skipped"
        );
    }
    Ok(replay)
}

/// Resolve a device by identity or friendly name.
fn find_device<'a>(snapshot: &'a Snapshot, reference: &str) -> Result<&'a Arc<Device>, CliError> {
    snapshot.lookup(reference).ok_or_else(|| {
        CoreError::DeviceNotFound {
            identifier: reference.to_owned(),
        }
        .into()
    })
}

/// Friendly name for an identity, falling back to the identity itself.
fn name_of(snapshot: &Snapshot, id: &DeviceId) -> String {
    snapshot
        .device(id)
        .map_or_else(|| id.to_string(), |d| d.display_name().to_owned())
}
