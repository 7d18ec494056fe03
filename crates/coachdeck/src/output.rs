//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses
//! `tabled`, JSON uses serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use coachdeck_core::model::EntityRecord;
use coachdeck_core::status::StatusBoard;
use coachdeck_core::{FeedMode, Notice, NoticeLevel};

use crate::cli::OutputFormat;

// ── Entity rendering ─────────────────────────────────────────────────

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "AREA")]
    area: String,
    #[tabled(rename = "STATE")]
    state: String,
}

fn entity_row(record: &EntityRecord) -> EntityRow {
    // An unconfirmed optimistic value is flagged, never shown as fresh.
    let state = if record.is_stale() {
        format!("{} (unconfirmed)", record.state)
    } else {
        record.state.clone()
    };
    EntityRow {
        id: record.id.to_string(),
        kind: record.kind.clone(),
        name: record.display_name.clone().unwrap_or_default(),
        area: record.area.clone().unwrap_or_default(),
        state,
    }
}

pub fn render_entities(format: &OutputFormat, records: &[Arc<EntityRecord>]) -> String {
    match format {
        OutputFormat::Table => {
            let rows: Vec<EntityRow> = records.iter().map(|r| entity_row(r)).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => {
            let values: Vec<&EntityRecord> = records.iter().map(AsRef::as_ref).collect();
            render_json(&values)
        }
        OutputFormat::Plain => records
            .iter()
            .map(|r| format!("{}\t{}", r.id, r.state))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// One-line change summary for `watch` streaming output.
pub fn render_entity_change(record: &EntityRecord) -> String {
    let name = record.display_name.as_deref().unwrap_or(record.id.as_str());
    let mut line = format!("{} [{}] -> {}", name, record.id, record.state);
    if let Some(brightness) = record.brightness() {
        line.push_str(&format!(" ({brightness}%)"));
    }
    if record.is_stale() {
        line.push_str(" (unconfirmed)");
    }
    line
}

// ── Status board rendering ───────────────────────────────────────────

pub fn render_status(format: &OutputFormat, board: &StatusBoard) -> String {
    match format {
        OutputFormat::Table => render_status_text(board),
        OutputFormat::Json => {
            let value = serde_json::json!({
                "mode": match board.mode {
                    FeedMode::PushActive => "push",
                    FeedMode::Polling => "polling",
                },
                "server": board.server,
                "health": board.health,
                "interfaces": board.interfaces,
            });
            render_json(&value)
        }
        OutputFormat::Plain => {
            let state = board
                .server
                .as_ref()
                .and_then(|s| s.state.clone())
                .unwrap_or_else(|| "unknown".into());
            state
        }
    }
}

fn render_status_text(board: &StatusBoard) -> String {
    let mut out = String::new();

    let mode = match board.mode {
        FeedMode::PushActive => "live",
        FeedMode::Polling => "polling",
    };
    out.push_str(&format!("feed: {mode}\n"));

    match &board.server {
        Some(server) => {
            out.push_str(&format!(
                "server: {} (version {})\n",
                server.state.as_deref().unwrap_or("unknown"),
                server.version.as_deref().unwrap_or("?"),
            ));
        }
        None => out.push_str("server: (no data)\n"),
    }

    match &board.health {
        Some(health) => {
            out.push_str(&format!(
                "health: {} entities, {} frames decoded, {} decode errors\n",
                health.entities_tracked.unwrap_or(0),
                health.frames_decoded.unwrap_or(0),
                health.decode_errors.unwrap_or(0),
            ));
        }
        None => out.push_str("health: (no data)\n"),
    }

    match &board.interfaces {
        Some(counters) => {
            for interface in &counters.interfaces {
                out.push_str(&format!(
                    "bus {}: {} rx {} tx {} err ({})\n",
                    interface.name,
                    interface.rx_frames,
                    interface.tx_frames,
                    interface.error_frames,
                    interface.state.as_deref().unwrap_or("unknown"),
                ));
            }
            if counters.interfaces.is_empty() {
                out.push_str("bus: (no interfaces)\n");
            }
        }
        None => out.push_str("bus: (no data)\n"),
    }

    out.trim_end().to_owned()
}

// ── Notices & misc ───────────────────────────────────────────────────

/// Print a transient notice to stderr, colored when attached to a
/// terminal.
pub fn print_notice(notice: &Notice) {
    let colored = io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err();
    let mut stderr = io::stderr().lock();
    let text = match (notice.level, colored) {
        (NoticeLevel::Error, true) => format!("{}", notice.message.red()),
        (NoticeLevel::Warning, true) => format!("{}", notice.message.yellow()),
        (NoticeLevel::Info, true) => format!("{}", notice.message.dimmed()),
        (_, false) => notice.message.clone(),
    };
    let _ = writeln!(stderr, "{text}");
}

/// Print rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}
