//! Clap derive structures for the `coachdeck` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// coachdeck -- operator console for the coach control-bus bridge
#[derive(Debug, Parser)]
#[command(
    name = "coachdeck",
    version,
    about = "Watch and control coach devices through the control-bus bridge daemon",
    long_about = "Operator console for a vehicle control-bus bridge.\n\n\
        The bridge daemon decodes the coach control bus into device entities\n\
        (lights, locks, sensors, tanks); coachdeck streams their state,\n\
        issues control commands, and shows bus diagnostics.",
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
    /// Bridge daemon URL (overrides the config file)
    #[arg(long, short = 'd', env = "COACHDECK_DAEMON", global = true)]
    pub daemon: Option<String>,

    /// Path to the config file
    #[arg(long, env = "COACHDECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "COACHDECK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Append diagnostics to a log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, env = "COACHDECK_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream entity updates for a view until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List the current entities of a view
    #[command(alias = "ls")]
    Entities(EntitiesArgs),

    /// Send a control command to an entity
    #[command(alias = "ctl")]
    Control(ControlArgs),

    /// Show the daemon status board (server, health, bus interfaces)
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// View stream to watch (defaults to the last used view)
    #[arg(long, short = 'w')]
    pub view: Option<String>,
}

#[derive(Debug, Args)]
pub struct EntitiesArgs {
    /// View stream to read (defaults to the last used view)
    #[arg(long, short = 'w')]
    pub view: Option<String>,

    /// Only show entities in this area
    #[arg(long)]
    pub area: Option<String>,

    /// How long to wait for the initial snapshot, in seconds
    #[arg(long, default_value = "5")]
    pub settle: u64,
}

#[derive(Debug, Args)]
pub struct ControlArgs {
    /// Entity id, e.g. light-12
    pub entity: String,

    /// Command name (on, off, lock, unlock, set_brightness, ...)
    pub command: String,

    /// Command parameters as key=value pairs
    #[arg(value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// How long to wait for the entity to appear on the stream, in seconds
    #[arg(long, default_value = "5")]
    pub resolve_timeout: u64,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Keep streaming board updates instead of printing one snapshot
    #[arg(long)]
    pub watch: bool,

    /// How long to wait for the first snapshot, in seconds
    #[arg(long, default_value = "10")]
    pub settle: u64,
}
