//! Device command handlers.

use std::sync::Arc;

use tabled::Tabled;

use zigmesh_core::{Device, Snapshot, resolve_route};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::config::Config;
use crate::error::CliError;
use crate::output::{self, Painter};

use super::{find_device, load, name_of};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Neighbors")]
    neighbors: usize,
    #[tabled(rename = "Hops")]
    hops: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

impl DeviceRow {
    fn new(d: &Arc<Device>, snapshot: &Snapshot, painter: Painter) -> Self {
        let route = resolve_route(snapshot, &d.id);
        Self {
            id: d.id.to_string(),
            name: d.display_name().to_owned(),
            kind: painter.kind(d.kind),
            model: d.model.clone().unwrap_or_default(),
            neighbors: d.neighbors.len(),
            hops: if route.reachable {
                route.hop_count().to_string()
            } else {
                painter.verdict(false, "-")
            },
            last_seen: d
                .last_seen
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

fn detail(d: &Arc<Device>, snapshot: &Snapshot, painter: Painter) -> String {
    let mut lines = vec![
        format!("ID:           {}", d.id),
        format!("Name:         {}", d.display_name()),
        format!("Kind:         {}", painter.kind(d.kind)),
        format!("Model:        {}", d.model.as_deref().unwrap_or("-")),
        format!("Vendor:       {}", d.vendor.as_deref().unwrap_or("-")),
        format!(
            "Capabilities: {}",
            if d.capabilities.is_empty() {
                "-".to_owned()
            } else {
                d.capabilities.join(", ")
            }
        ),
        format!(
            "Last seen:    {}",
            d.last_seen.map_or_else(|| "-".into(), |t| t.to_rfc3339())
        ),
    ];

    let route = resolve_route(snapshot, &d.id);
    lines.push(format!(
        "Route:        {}",
        if route.reachable {
            format!("{} hops, cost {}", route.hop_count(), route.cost)
        } else {
            painter.verdict(false, "unreachable")
        }
    ));

    if !d.neighbors.is_empty() {
        lines.push(String::new());
        lines.push(painter.heading("Neighbors"));
        for (neighbor, quality) in &d.neighbors {
            lines.push(format!(
                "  {:<24} LQI {}",
                name_of(snapshot, neighbor),
                painter.quality(*quality)
            ));
        }
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: DevicesArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let painter = Painter::new(global.color);
    match args.command {
        DevicesCommand::List(capture) => {
            let replay = load(&capture, cfg)?;
            let snapshot = &replay.snapshot;
            let devices: Vec<Arc<Device>> = snapshot.devices().cloned().collect();
            let out = output::render_list(
                global.output,
                &devices,
                |d| DeviceRow::new(d, snapshot, painter),
                |d| d.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Get { capture, device } => {
            let replay = load(&capture, cfg)?;
            let snapshot = &replay.snapshot;
            let found = find_device(snapshot, &device)?;
            let out = output::render_single(
                global.output,
                found,
                |d| detail(d, snapshot, painter),
                |d| d.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
