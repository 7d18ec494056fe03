//! `coachdeck entities` — list the current entities of a view.

use std::time::Duration;

use coachdeck_core::{Bridge, SubscriptionState};

use crate::cli::{EntitiesArgs, GlobalOpts};
use crate::config::FileConfig;
use crate::error::CliError;
use crate::output;
use crate::prefs::UiPrefs;

pub async fn handle(
    bridge: &Bridge,
    args: EntitiesArgs,
    file: &FileConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let prefs = UiPrefs::load(&UiPrefs::path());
    let view = super::resolve_view(args.view, file, &prefs);
    super::remember_view(&view);

    bridge.activate_view(&view)?;
    super::settle(bridge, Duration::from_secs(args.settle)).await;

    // An empty store with no live stream means we never heard from the
    // daemon — report that rather than printing an empty table as fact.
    if bridge.entities().is_empty() && bridge.view_state(&view) != SubscriptionState::Active {
        bridge.deactivate_view(&view);
        return Err(CliError::Timeout {
            seconds: args.settle,
            what: format!("the '{view}' entity snapshot"),
        });
    }

    let mut records = bridge.entities().as_ref().clone();
    if let Some(area) = &args.area {
        records.retain(|r| r.area.as_deref() == Some(area.as_str()));
    }

    let out = output::render_entities(&global.output, &records);
    output::print_output(&out, global.quiet);

    bridge.deactivate_view(&view);
    Ok(())
}
