//! Route handler.

use serde::Serialize;

use zigmesh_core::{DeviceId, Route, Snapshot, resolve_route};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, Painter};
use crate::replay::Replay;

use super::{find_device, name_of};

#[derive(Serialize)]
struct RouteView {
    device: DeviceId,
    snapshot_version: u64,
    hop_count: usize,
    #[serde(flatten)]
    route: Route,
}

fn detail(view: &RouteView, snapshot: &Snapshot, painter: Painter) -> String {
    let name = name_of(snapshot, &view.device);
    if !view.route.reachable {
        return format!(
            "{name} ({}): {}",
            view.device,
            painter.verdict(false, "no route to the coordinator")
        );
    }
    let path = view
        .route
        .hops
        .iter()
        .map(|id| name_of(snapshot, id))
        .collect::<Vec<_>>()
        .join(" -> ");
    [
        format!("Device:   {name} ({})", view.device),
        format!("Path:     {path}"),
        format!("Hops:     {}", view.hop_count),
        format!("Cost:     {}", view.route.cost),
        painter.dim(format!("Snapshot: v{}", view.snapshot_version)),
    ]
    .join("\n")
}

pub fn handle(replay: &Replay, reference: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = &replay.snapshot;
    let device = find_device(snapshot, reference)?;
    let route = resolve_route(snapshot, &device.id);
    let view = RouteView {
        device: device.id.clone(),
        snapshot_version: snapshot.version(),
        hop_count: route.hop_count(),
        route,
    };

    let painter = Painter::new(global.color);
    let out = output::render_single(
        global.output,
        &view,
        |v| detail(v, snapshot, painter),
        |v| {
            v.route
                .hops
                .iter()
                .map(DeviceId::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
