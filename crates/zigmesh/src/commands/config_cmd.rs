//! Config subcommand handlers.

use std::time::Duration;

use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use zigmesh_core::OperationKind;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Deadline {
    kind: OperationKind,
    #[serde(skip)]
    timeout: Duration,
    timeout_ms: u64,
    idempotent: bool,
    retries: u32,
}

#[derive(Tabled)]
struct DeadlineRow {
    #[tabled(rename = "Operation")]
    kind: String,
    #[tabled(rename = "Deadline")]
    timeout: String,
    #[tabled(rename = "Retries")]
    retries: u32,
}

/// Effective per-kind deadlines after overrides.
fn deadlines(cfg: &Config) -> Result<Vec<Deadline>, CliError> {
    let core = cfg.to_controller_config()?;
    Ok(OperationKind::iter()
        .map(|kind| {
            let idempotent = kind.is_idempotent();
            let timeout = core.orchestrator.timeouts.for_kind(kind);
            Deadline {
                kind,
                timeout,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                idempotent,
                retries: if idempotent {
                    core.orchestrator.max_retries
                } else {
                    0
                },
            }
        })
        .collect())
}

pub fn handle(
    args: ConfigArgs,
    cfg: Result<Config, CliError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let path = config::resolve_path(global);
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            let mut fresh = Config::default();
            if let Some(coordinator) = &global.coordinator {
                fresh.coordinator.clone_from(coordinator);
            }
            config::save_config_to(&fresh, &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = cfg?;
            let out = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            })?;
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Check => {
            let cfg = cfg?;
            let rows = deadlines(&cfg)?;
            let out = output::render_list(
                global.output,
                &rows,
                |d| DeadlineRow {
                    kind: d.kind.to_string(),
                    timeout: humantime::format_duration(d.timeout).to_string(),
                    retries: d.retries,
                },
                |d| format!("{} {}", d.kind, d.timeout_ms),
            )?;
            if !global.quiet {
                eprintln!("{} is valid", path.display());
            }
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
