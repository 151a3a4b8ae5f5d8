//! Clap derive structures for the `zigmesh` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// zigmesh -- inspect a Zigbee mesh from captured bridge traffic
#[derive(Debug, Parser)]
#[command(
    name = "zigmesh",
    version,
    about = "Inspect Zigbee mesh topology and routes from bridge captures",
    long_about = "Replays a capture of Zigbee-to-MQTT bridge events (one JSON \
        object per line) through the topology ingestor and reports the \
        resulting devices, links and routes to the coordinator.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "ZIGMESH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Coordinator identity (overrides config)
    #[arg(long, env = "ZIGMESH_COORDINATOR", global = true)]
    pub coordinator: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ZIGMESH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize the topology a capture produces
    #[command(alias = "snap")]
    Snapshot(CaptureArgs),

    /// List or inspect devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// List radio links with their quality
    Links(CaptureArgs),

    /// Show the path from a device to the coordinator
    #[command(alias = "r")]
    Route(RouteArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Arguments ─────────────────────────────────────────────────

/// Where to read bridge events from.
#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Capture file, one bridge event per line (`-` for stdin)
    pub capture: PathBuf,

    /// Fail on the first unreadable or malformed event instead of skipping it
    #[arg(long)]
    pub strict: bool,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List all devices
    #[command(alias = "ls")]
    List(CaptureArgs),

    /// Show one device by identity or friendly name
    Get {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Device identity (0x...) or friendly name
        device: String,
    },
}

// ── Route ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RouteArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Device identity (0x...) or friendly name
    pub device: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file populated with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Validate the configuration and print the effective deadlines
    Check,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
