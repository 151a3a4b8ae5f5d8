mod cli;
mod commands;
mod config;
mod error;
mod output;
mod replay;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::CliError;

fn main() {
    let cli = Cli::parse();

    // Config is needed before tracing so its log_level can seed the filter;
    // errors surface once the command runs.
    let cfg = config::load(&cli.global);
    let default_level = cfg.as_ref().map_or("warn", |c| c.log_level.as_str());
    init_tracing(cli.global.verbose, default_level);

    if let Err(err) = run(cli, cfg) {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, default_level: &str) {
    let filter = match verbosity {
        0 => default_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, cfg: Result<Config, CliError>) -> Result<(), CliError> {
    let global = &cli.global;
    match cli.command {
        // Config commands must work even when the file is broken
        Command::Config(args) => commands::config_cmd::handle(args, cfg, global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "zigmesh", &mut std::io::stdout());
            Ok(())
        }

        Command::Snapshot(args) => {
            commands::snapshot::handle(&commands::load(&args, &cfg?)?, global)
        }
        Command::Devices(args) => commands::devices::handle(args, &cfg?, global),
        Command::Links(args) => commands::links::handle(&commands::load(&args, &cfg?)?, global),
        Command::Route(args) => commands::route::handle(
            &commands::load(&args.capture, &cfg?)?,
            &args.device,
            global,
        ),
    }
}
