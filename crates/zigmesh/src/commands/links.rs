//! Link listing handler.

use tabled::Tabled;

use zigmesh_core::{Link, link_cost};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, Painter};
use crate::replay::Replay;

use super::name_of;

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "LQI")]
    quality: String,
    #[tabled(rename = "Cost")]
    cost: String,
}

pub fn handle(replay: &Replay, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = &replay.snapshot;
    let painter = Painter::new(global.color);
    let out = output::render_list(
        global.output,
        snapshot.links(),
        |l: &Link| LinkRow {
            source: name_of(snapshot, &l.source),
            target: name_of(snapshot, &l.target),
            quality: painter.quality(l.quality),
            cost: link_cost(l.quality).map_or_else(|| "-".into(), |c| c.to_string()),
        },
        |l| format!("{} {} {}", l.source, l.target, l.quality),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
