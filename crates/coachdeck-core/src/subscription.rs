//! Per-view subscription lifecycle.
//!
//! Binds a named view's visibility to the lifecycle of one push channel:
//! activation opens a channel and a forwarder feeding the reconciler,
//! deactivation tears both down. Activation is idempotent while a channel
//! is connecting or open, so repeated navigation events never open
//! duplicate sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use coachdeck_api::channel::{ChannelConfig, ChannelState, PushChannelHandle, PushFrame};

use crate::error::CoreError;

// ── SubscriptionState ───────────────────────────────────────────────

/// Observable lifecycle of one view's subscription.
///
/// `Activating` absorbs rapid repeated activate calls (fast view-switch
/// clicks) without opening duplicate sockets; it collapses back to
/// `Inactive` if the view deactivates before the channel opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Inactive,
    Activating,
    Active,
}

// ── SubscriptionController ──────────────────────────────────────────

struct ViewSubscription {
    handle: PushChannelHandle,
}

/// Owns zero-or-one push channel per view name.
///
/// Channels are exclusively owned: no socket is ever shared between
/// views, and a deactivated view's channel is closed, cancelling any
/// pending reconnect timer with it.
pub struct SubscriptionController {
    stream_base: Url,
    channel_config: ChannelConfig,
    ingest_tx: mpsc::UnboundedSender<Arc<PushFrame>>,
    cancel: CancellationToken,
    subscriptions: Mutex<HashMap<String, ViewSubscription>>,
}

impl SubscriptionController {
    pub(crate) fn new(
        stream_base: Url,
        channel_config: ChannelConfig,
        ingest_tx: mpsc::UnboundedSender<Arc<PushFrame>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_base,
            channel_config,
            ingest_tx,
            cancel,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Activate a view's subscription.
    ///
    /// No-op while an existing channel for the view is connecting or
    /// open. A terminally-closed channel (owner teardown or exhausted
    /// retry budget) is replaced with a fresh one.
    pub fn activate(&self, view: &str) -> Result<SubscriptionState, CoreError> {
        let mut subscriptions = self.lock();

        if let Some(existing) = subscriptions.get(view) {
            let state = existing.handle.current_state();
            if !state.is_terminal() {
                tracing::debug!(view, "subscription already live, ignoring repeat activation");
                return Ok(derive_state(&state));
            }
            tracing::debug!(view, "replacing terminally-closed subscription channel");
        }

        let url = self.view_url(view)?;
        let handle = PushChannelHandle::open(&url, self.channel_config.clone())?;

        let frames = handle.frames();
        let forward_cancel = self.cancel.child_token();
        tokio::spawn(forward_frames(
            view.to_owned(),
            frames,
            self.ingest_tx.clone(),
            forward_cancel,
        ));

        subscriptions.insert(view.to_owned(), ViewSubscription { handle });
        tracing::info!(view, url = %url, "subscription activated");
        Ok(SubscriptionState::Activating)
    }

    /// Close and discard the view's channel, releasing the socket.
    ///
    /// Arriving before the channel opens collapses the subscription
    /// straight back to `Inactive` — the in-flight handshake is aborted.
    pub fn deactivate(&self, view: &str) {
        if let Some(subscription) = self.lock().remove(view) {
            subscription.handle.close();
            tracing::info!(view, "subscription deactivated");
        }
    }

    /// Current lifecycle state for a view.
    pub fn state(&self, view: &str) -> SubscriptionState {
        self.lock()
            .get(view)
            .map_or(SubscriptionState::Inactive, |s| {
                derive_state(&s.handle.current_state())
            })
    }

    /// Views holding a live (non-terminal) channel.
    pub fn active_views(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, s)| !s.handle.current_state().is_terminal())
            .map(|(view, _)| view.clone())
            .collect()
    }

    /// Tear down every subscription.
    pub(crate) fn shutdown(&self) {
        for (view, subscription) in self.lock().drain() {
            subscription.handle.close();
            tracing::debug!(view, "subscription closed on shutdown");
        }
    }

    fn view_url(&self, view: &str) -> Result<Url, CoreError> {
        self.stream_base
            .join(view)
            .map_err(|e| CoreError::Config(format!("invalid view stream URL for '{view}': {e}")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ViewSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn derive_state(channel: &ChannelState) -> SubscriptionState {
    match channel {
        ChannelState::Connecting { .. } => SubscriptionState::Activating,
        ChannelState::Open => SubscriptionState::Active,
        ChannelState::Closed => SubscriptionState::Inactive,
    }
}

/// Forward one channel's frames into the reconciler's ingest queue.
///
/// Exits when the channel closes (its broadcast sender drops) or the
/// controller shuts down.
async fn forward_frames(
    view: String,
    mut frames: broadcast::Receiver<Arc<PushFrame>>,
    ingest_tx: mpsc::UnboundedSender<Arc<PushFrame>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.recv() => {
                match frame {
                    Ok(frame) => {
                        if ingest_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(view, skipped, "subscription forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::debug!(view, "subscription forwarder exiting");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn derive_state_maps_channel_lifecycle() {
        assert_eq!(
            derive_state(&ChannelState::Connecting { attempt: 0 }),
            SubscriptionState::Activating
        );
        assert_eq!(derive_state(&ChannelState::Open), SubscriptionState::Active);
        assert_eq!(derive_state(&ChannelState::Closed), SubscriptionState::Inactive);
    }

    #[tokio::test]
    async fn unknown_view_is_inactive() {
        let (ingest_tx, _ingest_rx) = mpsc::unbounded_channel();
        let controller = SubscriptionController::new(
            Url::parse("ws://127.0.0.1:1/api/stream/").unwrap(),
            ChannelConfig::default(),
            ingest_tx,
            CancellationToken::new(),
        );

        assert_eq!(controller.state("lights"), SubscriptionState::Inactive);
        assert!(controller.active_views().is_empty());
    }
}
