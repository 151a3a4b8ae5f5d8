//! Snapshot summary handler.

use serde::Serialize;

use zigmesh_core::{DeviceId, DeviceKind, Snapshot, resolve_route};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, Painter};
use crate::replay::{Replay, ReplayStats};

#[derive(Serialize)]
struct Summary {
    version: u64,
    coordinator: DeviceId,
    devices: usize,
    routers: usize,
    end_devices: usize,
    links: usize,
    /// Devices with no usable path to the coordinator.
    unreachable: Vec<DeviceId>,
    replay: ReplayStats,
}

impl Summary {
    fn new(snapshot: &Snapshot, stats: ReplayStats) -> Self {
        let count = |kind: DeviceKind| snapshot.devices().filter(|d| d.kind == kind).count();
        let unreachable = snapshot
            .devices()
            .filter(|d| !resolve_route(snapshot, &d.id).reachable)
            .map(|d| d.id.clone())
            .collect();
        Self {
            version: snapshot.version(),
            coordinator: snapshot.coordinator_id().clone(),
            devices: snapshot.device_count(),
            routers: count(DeviceKind::Router),
            end_devices: count(DeviceKind::EndDevice),
            links: snapshot.links().len(),
            unreachable,
            replay: stats,
        }
    }
}

fn detail(s: &Summary, painter: Painter) -> String {
    let unreachable = if s.unreachable.is_empty() {
        painter.verdict(true, "none")
    } else {
        painter.verdict(
            false,
            s.unreachable
                .iter()
                .map(DeviceId::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        )
    };
    let r = &s.replay;
    [
        painter.heading("Topology"),
        format!("Version:      {}", s.version),
        format!("Coordinator:  {}", s.coordinator),
        format!(
            "Devices:      {} ({} routers, {} end devices)",
            s.devices, s.routers, s.end_devices
        ),
        format!("Links:        {}", s.links),
        format!("Unreachable:  {unreachable}"),
        String::new(),
        painter.heading("Replay"),
        format!("Events:       {}", r.events),
        format!(
            "Telemetry:    {} committed, {} dropped, {} rejected",
            r.ingest.committed, r.ingest.dropped, r.ingest.rejected
        ),
        format!("Responses:    {}", r.responses),
        format!(
            "Skipped:      {}",
            painter.dim(format!(
                "{} unparseable, {} malformed",
                r.unparseable, r.malformed
            ))
        ),
    ]
    .join("\n")
}

pub fn handle(replay: &Replay, global: &GlobalOpts) -> Result<(), CliError> {
    let summary = Summary::new(&replay.snapshot, replay.stats);
    let painter = Painter::new(global.color);
    let out = output::render_single(
        global.output,
        &summary,
        |s| detail(s, painter),
        |s| s.version.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
