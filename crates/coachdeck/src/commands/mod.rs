//! Command dispatch: bridges CLI args -> bridge operations -> output.

pub mod control;
pub mod entities;
pub mod status;
pub mod watch;

use std::time::Duration;

use coachdeck_core::Bridge;

use crate::cli::{Command, GlobalOpts};
use crate::config::FileConfig;
use crate::error::CliError;
use crate::prefs::UiPrefs;

/// Stream name used when neither a flag, a remembered preference, nor
/// the config file names a view.
const DEFAULT_VIEW: &str = "entities";

/// Dispatch a command to its handler.
pub async fn dispatch(
    command: Command,
    bridge: &Bridge,
    file: &FileConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        Command::Watch(args) => watch::handle(bridge, args, file, global).await,
        Command::Entities(args) => entities::handle(bridge, args, file, global).await,
        Command::Control(args) => control::handle(bridge, args, file, global).await,
        Command::Status(args) => status::handle(bridge, args, global).await,
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Pick the view stream: explicit flag, then the operator's last-used
/// view, then the config file default, then the all-entities stream.
fn resolve_view(explicit: Option<String>, file: &FileConfig, prefs: &UiPrefs) -> String {
    explicit
        .or_else(|| prefs.view_filter.clone())
        .or_else(|| file.default_view.clone())
        .unwrap_or_else(|| DEFAULT_VIEW.to_owned())
}

/// Persist the last-used view for the next invocation.
///
/// Best-effort: preferences are a convenience, never worth failing a
/// command over.
fn remember_view(view: &str) {
    let path = UiPrefs::path();
    let mut prefs = UiPrefs::load(&path);
    if prefs.view_filter.as_deref() == Some(view) {
        return;
    }
    prefs.view_filter = Some(view.to_owned());
    if let Err(e) = prefs.store(&path) {
        tracing::debug!(error = %e, "could not persist view preference");
    }
}

/// Parse `key=value` command parameters.
///
/// Values that parse as JSON keep their type (numbers, booleans);
/// anything else is a plain string, so `brightness=40` is numeric and
/// `scene=evening` is not.
fn parse_params(
    pairs: &[String],
) -> Result<serde_json::Map<String, serde_json::Value>, CliError> {
    let mut params = serde_json::Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::Validation {
                field: "params".into(),
                reason: format!("expected KEY=VALUE, got '{pair}'"),
            });
        };
        if key.is_empty() {
            return Err(CliError::Validation {
                field: "params".into(),
                reason: format!("empty key in '{pair}'"),
            });
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
        params.insert(key.to_owned(), value);
    }
    Ok(params)
}

/// Wait for the attach snapshot to drain.
///
/// The daemon pushes full entity state when a stream attaches; the store
/// is settled once no mutation lands for a quiet window, bounded by
/// `budget` for daemons that keep streaming.
async fn settle(bridge: &Bridge, budget: Duration) {
    const QUIET_WINDOW: Duration = Duration::from_millis(400);

    let mut version = bridge.store().subscribe_version();
    let _ = tokio::time::timeout(budget, async {
        loop {
            match tokio::time::timeout(QUIET_WINDOW, version.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    })
    .await;
}
