//! `coachdeck status` — show the daemon status board.

use std::time::Duration;

use coachdeck_core::Bridge;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    bridge: &Bridge,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let feed = bridge.status_feed()?;
    let mut board = feed.board();

    // First snapshot arrives from either a push frame or the immediate
    // poll the feed fires on startup.
    let _ = tokio::time::timeout(Duration::from_secs(args.settle), async {
        loop {
            if board.borrow_and_update().has_data() {
                return;
            }
            if board.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    if !board.borrow().has_data() {
        feed.shutdown();
        return Err(CliError::Timeout {
            seconds: args.settle,
            what: "the first status snapshot".into(),
        });
    }

    let current = board.borrow_and_update().clone();
    output::print_output(&output::render_status(&global.output, &current), global.quiet);

    if args.watch {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = board.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = board.borrow_and_update().clone();
                    output::print_output(
                        &output::render_status(&global.output, &current),
                        global.quiet,
                    );
                }
            }
        }
    }

    feed.shutdown();
    Ok(())
}
