//! `coachdeck control` — send a control command to an entity.

use std::time::Duration;

use coachdeck_core::{Bridge, EntityId};

use crate::cli::{ControlArgs, GlobalOpts};
use crate::config::FileConfig;
use crate::error::CliError;
use crate::prefs::UiPrefs;

pub async fn handle(
    bridge: &Bridge,
    args: ControlArgs,
    file: &FileConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let params = super::parse_params(&args.params)?;
    let id: EntityId = args.entity.as_str().into();

    // The command path rolls back to the pre-command record on failure,
    // so the entity must be on the stream before we issue anything.
    let prefs = UiPrefs::load(&UiPrefs::path());
    let view = super::resolve_view(None, file, &prefs);
    bridge.activate_view(&view)?;

    if !wait_for_entity(bridge, &id, Duration::from_secs(args.resolve_timeout)).await {
        bridge.deactivate_view(&view);
        return Err(CliError::EntityNotFound { id: args.entity });
    }

    let result = bridge.control(&id, &args.command, params).await;
    bridge.deactivate_view(&view);

    let ack = result?;
    if !global.quiet {
        let status = ack.status.as_deref().unwrap_or("accepted");
        eprintln!("command '{}' {status} for {id}", args.command);
    }
    Ok(())
}

/// Wait for the entity to appear in the store, bounded by `budget`.
async fn wait_for_entity(bridge: &Bridge, id: &EntityId, budget: Duration) -> bool {
    if bridge.entity(id).is_some() {
        return true;
    }
    let mut entities = bridge.subscribe_entities();
    tokio::time::timeout(budget, async {
        loop {
            if entities.changed().await.is_err() {
                return false;
            }
            if entities.borrow_and_update().iter().any(|r| &r.id == id) {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false)
}
