//! `coachdeck watch` — stream entity updates for a view until
//! interrupted.

use std::time::Duration;

use coachdeck_core::{Bridge, SubscriptionState};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::FileConfig;
use crate::error::CliError;
use crate::output;
use crate::prefs::UiPrefs;

/// Cadence for the connection indicator check.
const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(2);

pub async fn handle(
    bridge: &Bridge,
    args: WatchArgs,
    file: &FileConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let prefs = UiPrefs::load(&UiPrefs::path());
    let view = super::resolve_view(args.view, file, &prefs);
    super::remember_view(&view);

    bridge.activate_view(&view)?;
    let mut entities = bridge.subscribe_entities();
    let mut notices = bridge.notices();
    let mut notices_alive = true;

    if !global.quiet {
        eprintln!("watching '{view}' (ctrl-c to stop)");
    }

    // Print every record whose revision is newer than what we've shown;
    // the snapshot watch coalesces bursts, so one wakeup may carry many.
    let mut shown_revision = 0u64;
    let mut last_state = bridge.view_state(&view);
    let mut ticker = tokio::time::interval(STATE_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = entities.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = entities.borrow_and_update().clone();
                for record in snapshot.iter().filter(|r| r.revision > shown_revision) {
                    let line = format!(
                        "{} {}",
                        chrono::Local::now().format("%H:%M:%S"),
                        output::render_entity_change(record)
                    );
                    output::print_output(&line, global.quiet);
                }
                shown_revision = snapshot
                    .iter()
                    .map(|r| r.revision)
                    .max()
                    .unwrap_or(shown_revision);
            }

            notice = notices.recv(), if notices_alive => {
                match notice {
                    Ok(notice) => output::print_notice(&notice),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        notices_alive = false;
                    }
                }
            }

            _ = ticker.tick() => {
                let state = bridge.view_state(&view);
                if state != last_state {
                    report_state_change(&view, state, global.quiet);
                    last_state = state;
                }
            }
        }
    }

    bridge.deactivate_view(&view);
    Ok(())
}

/// Connection indicator: the operator always knows whether the stream is
/// live or the data is going stale.
fn report_state_change(view: &str, state: SubscriptionState, quiet: bool) {
    if quiet {
        return;
    }
    match state {
        SubscriptionState::Active => eprintln!("[{view}] connected"),
        SubscriptionState::Activating => eprintln!("[{view}] disconnected, reconnecting..."),
        SubscriptionState::Inactive => eprintln!("[{view}] disconnected"),
    }
}
