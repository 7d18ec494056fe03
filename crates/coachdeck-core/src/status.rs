//! Hybrid push/poll status feed for the summary dashboard.
//!
//! Delivers one logical status board (daemon status, health counters, bus
//! interface counters) to the dashboard: pushed over the daemon's status
//! stream when that channel is open, polled at a fixed interval
//! otherwise — never both at once. Entering push mode invalidates every
//! in-flight poll, so a slow poll resolving after the channel opens can
//! never overwrite fresher push data. Dropping back to polling fires one
//! immediate poll so the dashboard never freezes for a full interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use coachdeck_api::channel::{ChannelState, PushChannelHandle, PushFrame};
use coachdeck_api::rest::{DaemonClient, HealthCounters, InterfaceCounters, ServerStatus};

// ── StatusFetch ─────────────────────────────────────────────────────

/// The poll-side collaborator: three independent status endpoints.
///
/// A trait seam so the feed's state machine is testable with a scripted
/// fake instead of a live daemon.
pub trait StatusFetch: Send + Sync + 'static {
    fn server_status(
        &self,
    ) -> impl Future<Output = Result<ServerStatus, coachdeck_api::Error>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthCounters, coachdeck_api::Error>> + Send;

    fn bus_interfaces(
        &self,
    ) -> impl Future<Output = Result<InterfaceCounters, coachdeck_api::Error>> + Send;
}

impl StatusFetch for DaemonClient {
    fn server_status(
        &self,
    ) -> impl Future<Output = Result<ServerStatus, coachdeck_api::Error>> + Send {
        DaemonClient::server_status(self)
    }

    fn health(&self) -> impl Future<Output = Result<HealthCounters, coachdeck_api::Error>> + Send {
        DaemonClient::health(self)
    }

    fn bus_interfaces(
        &self,
    ) -> impl Future<Output = Result<InterfaceCounters, coachdeck_api::Error>> + Send {
        DaemonClient::bus_interfaces(self)
    }
}

// ── StatusBoard ─────────────────────────────────────────────────────

/// How the board is currently being fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    #[default]
    Polling,
    PushActive,
}

/// The dashboard's status snapshot.
///
/// The three sections are independent: each updates on its own and a
/// failure fetching one never blocks the others.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    pub mode: FeedMode,
    pub server: Option<ServerStatus>,
    pub health: Option<HealthCounters>,
    pub interfaces: Option<InterfaceCounters>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusBoard {
    pub fn has_data(&self) -> bool {
        self.server.is_some() || self.health.is_some() || self.interfaces.is_some()
    }
}

// ── HybridStatusFeed ────────────────────────────────────────────────

/// Handle to a running status feed.
///
/// Owns its push channel (when constructed through the bridge); teardown
/// cancels the driver task and every pending poll timer.
pub struct HybridStatusFeed {
    board_rx: watch::Receiver<StatusBoard>,
    cancel: CancellationToken,
    channel: Option<PushChannelHandle>,
}

impl HybridStatusFeed {
    /// Spawn the feed driver over the given channel observation ends.
    ///
    /// Starts in `Polling` with an immediate first poll.
    pub fn spawn<F: StatusFetch>(
        fetch: F,
        poll_interval: Duration,
        channel_state: watch::Receiver<ChannelState>,
        frames: broadcast::Receiver<Arc<PushFrame>>,
        cancel: CancellationToken,
    ) -> Self {
        let (board_tx, board_rx) = watch::channel(StatusBoard::default());

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            feed_loop(
                Arc::new(fetch),
                poll_interval,
                channel_state,
                frames,
                board_tx,
                task_cancel,
            )
            .await;
        });

        Self {
            board_rx,
            cancel,
            channel: None,
        }
    }

    /// Take ownership of the push channel backing this feed, so teardown
    /// releases its socket.
    pub(crate) fn with_channel(mut self, channel: PushChannelHandle) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Subscribe to board updates.
    pub fn board(&self) -> watch::Receiver<StatusBoard> {
        self.board_rx.clone()
    }

    /// The board as of now.
    pub fn current(&self) -> StatusBoard {
        self.board_rx.borrow().clone()
    }

    /// Cancel the driver, all pending poll timers, and the owned channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(ref channel) = self.channel {
            channel.close();
        }
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// One poll cycle's outcome; failed sections are logged and omitted so
/// the board keeps its last-known value for them.
struct PollResults {
    server: Option<ServerStatus>,
    health: Option<HealthCounters>,
    interfaces: Option<InterfaceCounters>,
}

#[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
async fn feed_loop<F: StatusFetch>(
    fetch: Arc<F>,
    poll_interval: Duration,
    mut channel_state: watch::Receiver<ChannelState>,
    mut frames: broadcast::Receiver<Arc<PushFrame>>,
    board_tx: watch::Sender<StatusBoard>,
    cancel: CancellationToken,
) {
    let mut mode = FeedMode::Polling;

    // Every poll is tagged with the epoch at spawn time; mode transitions
    // bump the epoch, so results from a superseded cycle are discarded on
    // arrival instead of overwriting fresher data.
    let mut epoch: u64 = 0;

    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<(u64, PollResults)>();
    let mut interval = tokio::time::interval(poll_interval);

    // Channel ends can outlive their senders; a dead end disables its
    // select arm instead of spinning.
    let mut state_alive = true;
    let mut frames_alive = true;

    if channel_state.borrow_and_update().is_open() {
        mode = FeedMode::PushActive;
        epoch += 1;
        board_tx.send_modify(|b| b.mode = mode);
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            changed = channel_state.changed(), if state_alive => {
                if changed.is_err() {
                    state_alive = false;
                    continue;
                }
                let state = channel_state.borrow_and_update().clone();
                match state {
                    ChannelState::Open if mode == FeedMode::Polling => {
                        enter_push_mode(&mut mode, &mut epoch, &board_tx);
                    }
                    ChannelState::Connecting { .. } | ChannelState::Closed
                        if mode == FeedMode::PushActive =>
                    {
                        enter_polling_mode(&mut mode, &mut epoch, &board_tx);
                        // Immediate poll — the dashboard must not freeze
                        // for a full interval after losing the stream.
                        spawn_poll(&fetch, epoch, &poll_tx);
                        interval.reset();
                    }
                    _ => {}
                }
            }

            frame = frames.recv(), if frames_alive => {
                match frame {
                    Ok(frame) => {
                        if mode == FeedMode::Polling {
                            // A frame can beat the Open transition to
                            // this loop; one drained after the channel
                            // closed must not resurrect push mode or
                            // overwrite poll data.
                            if !channel_state.borrow().is_open() {
                                tracing::debug!("dropping status frame from closed channel");
                                continue;
                            }
                            enter_push_mode(&mut mode, &mut epoch, &board_tx);
                        }
                        apply_status_frame(&frame.payload, &board_tx);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status feed lagged behind push frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        frames_alive = false;
                    }
                }
            }

            result = poll_rx.recv() => {
                let Some((poll_epoch, results)) = result else { break };
                if poll_epoch == epoch && mode == FeedMode::Polling {
                    apply_poll_results(results, &board_tx);
                } else {
                    tracing::debug!(poll_epoch, epoch, "discarding stale poll result");
                }
            }

            _ = interval.tick(), if mode == FeedMode::Polling => {
                spawn_poll(&fetch, epoch, &poll_tx);
            }
        }
    }

    tracing::debug!("status feed driver exiting");
}

fn enter_push_mode(mode: &mut FeedMode, epoch: &mut u64, board_tx: &watch::Sender<StatusBoard>) {
    *mode = FeedMode::PushActive;
    // Invalidate pending polls before the first push-driven render.
    *epoch += 1;
    board_tx.send_modify(|b| b.mode = FeedMode::PushActive);
    tracing::info!("status feed switched to push");
}

fn enter_polling_mode(mode: &mut FeedMode, epoch: &mut u64, board_tx: &watch::Sender<StatusBoard>) {
    *mode = FeedMode::Polling;
    *epoch += 1;
    board_tx.send_modify(|b| b.mode = FeedMode::Polling);
    tracing::info!("status feed fell back to polling");
}

/// Run the three fetches concurrently off-loop so a slow endpoint never
/// stalls frame handling. Each section fails independently.
fn spawn_poll<F: StatusFetch>(
    fetch: &Arc<F>,
    epoch: u64,
    poll_tx: &mpsc::UnboundedSender<(u64, PollResults)>,
) {
    let fetch = Arc::clone(fetch);
    let poll_tx = poll_tx.clone();
    tokio::spawn(async move {
        let (server, health, interfaces) = tokio::join!(
            fetch.server_status(),
            fetch.health(),
            fetch.bus_interfaces(),
        );
        let results = PollResults {
            server: ok_or_log("server", server),
            health: ok_or_log("health", health),
            interfaces: ok_or_log("interfaces", interfaces),
        };
        let _ = poll_tx.send((epoch, results));
    });
}

fn ok_or_log<T>(section: &str, result: Result<T, coachdeck_api::Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(section, error = %e, "status poll section failed");
            None
        }
    }
}

fn apply_poll_results(results: PollResults, board_tx: &watch::Sender<StatusBoard>) {
    board_tx.send_modify(|board| {
        if let Some(server) = results.server {
            board.server = Some(server);
        }
        if let Some(health) = results.health {
            board.health = Some(health);
        }
        if let Some(interfaces) = results.interfaces {
            board.interfaces = Some(interfaces);
        }
        board.updated_at = Some(Utc::now());
    });
}

/// Apply one status stream frame: `{ "section": "...", ...payload }`.
///
/// Sections arrive independently; an undecodable frame is dropped with a
/// diagnostic.
fn apply_status_frame(payload: &serde_json::Value, board_tx: &watch::Sender<StatusBoard>) {
    let Some(section) = payload.get("section").and_then(serde_json::Value::as_str) else {
        tracing::warn!("status frame without section field dropped");
        return;
    };

    let mut body = payload.clone();
    if let Some(object) = body.as_object_mut() {
        object.remove("section");
    }

    match section {
        "server" => match serde_json::from_value::<ServerStatus>(body) {
            Ok(server) => board_tx.send_modify(|b| {
                b.server = Some(server);
                b.updated_at = Some(Utc::now());
            }),
            Err(e) => tracing::warn!(error = %e, "undecodable server status frame"),
        },
        "health" => match serde_json::from_value::<HealthCounters>(body) {
            Ok(health) => board_tx.send_modify(|b| {
                b.health = Some(health);
                b.updated_at = Some(Utc::now());
            }),
            Err(e) => tracing::warn!(error = %e, "undecodable health status frame"),
        },
        "interfaces" => match serde_json::from_value::<InterfaceCounters>(body) {
            Ok(interfaces) => board_tx.send_modify(|b| {
                b.interfaces = Some(interfaces);
                b.updated_at = Some(Utc::now());
            }),
            Err(e) => tracing::warn!(error = %e, "undecodable interface status frame"),
        },
        other => {
            tracing::debug!(section = other, "unknown status section ignored");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Scripted fetcher: counts polls, optionally gates the first one,
    /// optionally fails the health section.
    struct FakeFetch {
        polls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
        gate_first_poll: bool,
        health_fails: bool,
    }

    impl FakeFetch {
        fn new(gate_first_poll: bool, health_fails: bool) -> Self {
            Self {
                polls: Arc::new(AtomicUsize::new(0)),
                gate: Arc::new(Notify::new()),
                gate_first_poll,
                health_fails,
            }
        }
    }

    impl StatusFetch for FakeFetch {
        fn server_status(
            &self,
        ) -> impl Future<Output = Result<ServerStatus, coachdeck_api::Error>> + Send {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&self.gate);
            let gated = self.gate_first_poll && n == 0;
            async move {
                if gated {
                    gate.notified().await;
                }
                Ok(ServerStatus {
                    state: Some(format!("poll-{n}")),
                    ..ServerStatus::default()
                })
            }
        }

        fn health(
            &self,
        ) -> impl Future<Output = Result<HealthCounters, coachdeck_api::Error>> + Send {
            let fails = self.health_fails;
            async move {
                if fails {
                    Err(coachdeck_api::Error::Api {
                        status: 500,
                        message: "decoder wedged".into(),
                    })
                } else {
                    Ok(HealthCounters::default())
                }
            }
        }

        fn bus_interfaces(
            &self,
        ) -> impl Future<Output = Result<InterfaceCounters, coachdeck_api::Error>> + Send {
            async move { Ok(InterfaceCounters::default()) }
        }
    }

    fn status_frame(section: &str, state: &str) -> Arc<PushFrame> {
        Arc::new(PushFrame {
            payload: json!({ "section": section, "state": state }),
            received_at: Utc::now(),
        })
    }

    /// Poll a condition under the paused clock; each retry advances time
    /// by a few milliseconds only.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(300), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_poll_never_overwrites_push_data() {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting { attempt: 0 });
        let (frames_tx, frames_rx) = broadcast::channel(16);

        let fetch = FakeFetch::new(true, false);
        let polls = Arc::clone(&fetch.polls);
        let gate = Arc::clone(&fetch.gate);

        let feed = HybridStatusFeed::spawn(
            fetch,
            Duration::from_secs(3600),
            state_rx,
            frames_rx,
            CancellationToken::new(),
        );
        let board = feed.board();

        // Feed starts in Polling; the first poll goes in flight and
        // blocks on the gate.
        wait_until(|| polls.load(Ordering::SeqCst) == 1).await;

        // Push channel opens and delivers fresher data.
        state_tx.send(ChannelState::Open).unwrap();
        frames_tx.send(status_frame("server", "push")).unwrap();
        wait_until(|| {
            board
                .borrow()
                .server
                .as_ref()
                .is_some_and(|s| s.state.as_deref() == Some("push"))
        })
        .await;
        assert_eq!(board.borrow().mode, FeedMode::PushActive);

        // The stalled poll now resolves — its epoch is stale and it must
        // not render.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            board.borrow().server.as_ref().unwrap().state.as_deref(),
            Some("push"),
            "stale poll result overwrote push data"
        );

        feed.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_polling_polls_immediately() {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting { attempt: 0 });
        let (_frames_tx, frames_rx) = broadcast::channel(16);

        let fetch = FakeFetch::new(false, false);
        let polls = Arc::clone(&fetch.polls);

        let feed = HybridStatusFeed::spawn(
            fetch,
            Duration::from_secs(3600),
            state_rx,
            frames_rx,
            CancellationToken::new(),
        );
        let board = feed.board();

        // Initial poll renders.
        wait_until(|| {
            board
                .borrow()
                .server
                .as_ref()
                .is_some_and(|s| s.state.as_deref() == Some("poll-0"))
        })
        .await;

        // Push mode: the poll timer stops entirely.
        state_tx.send(ChannelState::Open).unwrap();
        wait_until(|| board.borrow().mode == FeedMode::PushActive).await;
        let polls_in_push = polls.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(7200)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            polls.load(Ordering::SeqCst),
            polls_in_push,
            "poll fired while push was active"
        );

        // Channel drops: one immediate poll, well before the next
        // scheduled interval.
        state_tx.send(ChannelState::Closed).unwrap();
        wait_until(|| {
            board
                .borrow()
                .server
                .as_ref()
                .is_some_and(|s| s.state.as_deref() == Some("poll-1"))
        })
        .await;
        assert_eq!(board.borrow().mode, FeedMode::Polling);

        feed.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn frame_drained_after_close_does_not_resurrect_push_mode() {
        let (state_tx, state_rx) = watch::channel(ChannelState::Open);
        let (frames_tx, frames_rx) = broadcast::channel(16);

        let fetch = FakeFetch::new(false, false);
        let polls = Arc::clone(&fetch.polls);

        let feed = HybridStatusFeed::spawn(
            fetch,
            Duration::from_secs(30),
            state_rx,
            frames_rx,
            CancellationToken::new(),
        );
        let board = feed.board();
        wait_until(|| board.borrow().mode == FeedMode::PushActive).await;

        // Buffer a frame, then close terminally and drop both channel
        // ends. The biased select observes the close first; the stale
        // frame drains afterwards and must be dropped, not re-enter
        // push mode.
        frames_tx.send(status_frame("server", "stale")).unwrap();
        state_tx.send(ChannelState::Closed).unwrap();
        drop(state_tx);
        drop(frames_tx);

        wait_until(|| board.borrow().mode == FeedMode::Polling).await;

        // Polling keeps running with no channel left to watch.
        let seen = polls.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(90)).await;
        wait_until(|| polls.load(Ordering::SeqCst) > seen).await;
        assert_eq!(board.borrow().mode, FeedMode::Polling);

        feed.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_section_does_not_block_the_others() {
        let (_state_tx, state_rx) = watch::channel(ChannelState::Connecting { attempt: 0 });
        let (_frames_tx, frames_rx) = broadcast::channel(16);

        let feed = HybridStatusFeed::spawn(
            FakeFetch::new(false, true),
            Duration::from_secs(3600),
            state_rx,
            frames_rx,
            CancellationToken::new(),
        );
        let board = feed.board();

        wait_until(|| board.borrow().server.is_some()).await;

        let current = board.borrow().clone();
        assert!(current.health.is_none(), "failed section must stay empty");
        assert!(current.interfaces.is_some());
        assert!(current.has_data());

        feed.shutdown();
    }

    #[tokio::test]
    async fn unknown_status_section_is_ignored() {
        let (board_tx, board_rx) = watch::channel(StatusBoard::default());
        apply_status_frame(&json!({ "section": "mystery", "x": 1 }), &board_tx);
        apply_status_frame(&json!({ "no_section": true }), &board_tx);
        assert!(!board_rx.borrow().has_data());
    }
}
