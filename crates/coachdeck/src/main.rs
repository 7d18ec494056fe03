mod cli;
mod commands;
mod config;
mod error;
mod output;
mod prefs;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coachdeck_core::Bridge;

use crate::cli::{Cli, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The appender guard must outlive every tracing call; dropping it
    // flushes the log file on exit.
    let _log_guard = init_tracing(&cli.global);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(global: &GlobalOpts) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = match global.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Diagnostics go to a file when asked, stderr otherwise — stdout is
    // reserved for command output.
    if let Some(path) = &global.log_file {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let file = path
            .file_name()
            .map_or_else(|| std::ffi::OsString::from("coachdeck.log"), ToOwned::to_owned);
        let appender =
            tracing_appender::rolling::never(dir.unwrap_or(std::path::Path::new(".")), file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        None
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = config::config_path(cli.global.config.as_deref());
    let file = config::load_file_config(&config_path)?;
    let bridge_config = config::resolve_bridge_config(&cli.global, &file, &config_path)?;

    let bridge = Bridge::new(bridge_config)?;
    tracing::debug!(daemon = %bridge.config().daemon_url, command = ?cli.command, "dispatching");

    let result = commands::dispatch(cli.command, &bridge, &file, &cli.global).await;
    bridge.shutdown();
    result
}
