//! Capture replay.
//!
//! Feeds a recorded stream of bridge events through the state ingestor,
//! exactly as the controller's event pump would, and hands back the
//! resulting snapshot.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use zigmesh_core::{
    BridgeEvent, DeviceId, IngestStats, Snapshot, StateIngestor, TelemetryEvent, TopologyStore,
};

use crate::cli::CaptureArgs;
use crate::error::CliError;

/// What a replay saw, line by line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Non-blank, non-comment lines.
    pub events: u64,
    /// Operation responses, which carry no topology.
    pub responses: u64,
    /// Lines that were not a bridge event at all.
    pub unparseable: u64,
    /// Telemetry whose payload did not fit its kind.
    pub malformed: u64,
    pub ingest: IngestStats,
}

impl ReplayStats {
    pub fn skipped(&self) -> u64 {
        self.unparseable + self.malformed + self.ingest.rejected
    }
}

pub struct Replay {
    pub snapshot: Arc<Snapshot>,
    pub stats: ReplayStats,
}

/// Replay the capture named by `args`.
pub fn run(args: &CaptureArgs, coordinator: DeviceId) -> Result<Replay, CliError> {
    let label = args.capture.display().to_string();
    if args.capture == Path::new("-") {
        let stdin = io::stdin();
        return replay_from(stdin.lock(), &label, args.strict, coordinator);
    }

    let file = File::open(&args.capture).map_err(|source| CliError::CaptureUnreadable {
        path: label.clone(),
        source,
    })?;
    replay_from(BufReader::new(file), &label, args.strict, coordinator)
}

/// Replay JSON-lines bridge events from any reader.
///
/// Blank lines and `#` comments are ignored. Bad lines are counted and
/// skipped unless `strict` is set.
pub fn replay_from(
    reader: impl BufRead,
    label: &str,
    strict: bool,
    coordinator: DeviceId,
) -> Result<Replay, CliError> {
    let store = Arc::new(TopologyStore::new(Snapshot::initial(coordinator)));
    let mut ingestor = StateIngestor::new(Arc::clone(&store));
    let mut stats = ReplayStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| CliError::CaptureUnreadable {
            path: label.to_owned(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.events += 1;
        let line_no = index + 1;

        let event: BridgeEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                if strict {
                    return Err(CliError::Validation {
                        field: format!("{label}:{line_no}"),
                        reason: e.to_string(),
                    });
                }
                warn!(line = line_no, error = %e, "skipping unparseable line");
                stats.unparseable += 1;
                continue;
            }
        };

        let telemetry = match TelemetryEvent::decode(&event) {
            None => {
                debug!(line = line_no, kind = %event.kind, "operation response, no topology");
                stats.responses += 1;
                continue;
            }
            Some(Ok(telemetry)) => telemetry,
            Some(Err(e)) => {
                if strict {
                    return Err(e.into());
                }
                warn!(line = line_no, error = %e, "skipping malformed telemetry");
                stats.malformed += 1;
                continue;
            }
        };

        if let Err(e) = ingestor.apply(telemetry) {
            if strict {
                return Err(e.into());
            }
        }
    }

    if stats.events == 0 {
        return Err(CliError::CaptureEmpty {
            path: label.to_owned(),
        });
    }

    stats.ingest = ingestor.stats();
    Ok(Replay {
        snapshot: store.current_snapshot(),
        stats,
    })
}
