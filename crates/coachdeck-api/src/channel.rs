//! Push channel with fixed-interval auto-reconnect.
//!
//! Connects to one of the bridge daemon's WebSocket stream endpoints and
//! broadcasts incoming JSON frames through a [`tokio::sync::broadcast`]
//! channel. Reconnection uses a fixed interval with an optional retry
//! budget — deliberately simple and operator-predictable rather than
//! exponential.
//!
//! # Example
//!
//! ```rust,ignore
//! use coachdeck_api::channel::{ChannelConfig, PushChannelHandle};
//! use url::Url;
//!
//! let url = Url::parse("ws://coach.local:8080/api/stream/lights")?;
//! let handle = PushChannelHandle::open(&url, ChannelConfig::default())?;
//! let mut frames = handle.frames();
//!
//! while let Ok(frame) = frames.recv().await {
//!     println!("{}", frame.payload);
//! }
//!
//! handle.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const FRAME_CHANNEL_CAPACITY: usize = 1024;

// ── PushFrame ────────────────────────────────────────────────────────

/// One JSON frame received from the daemon's push channel.
///
/// The payload is delivered unvalidated — shape checking belongs to the
/// reconciliation layer, so a frame the store rejects never costs the
/// channel its connection.
#[derive(Debug, Clone)]
pub struct PushFrame {
    /// Parsed JSON body of the text frame.
    pub payload: serde_json::Value,

    /// Local receive time, for staleness display.
    pub received_at: DateTime<Utc>,
}

// ── ChannelConfig ────────────────────────────────────────────────────

/// Reconnection policy for a push channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Reconnect after unexpected closure. Disabled means the first
    /// closure is terminal.
    pub auto_reconnect: bool,

    /// Fixed delay between reconnect attempts. Default: 5s.
    pub reconnect_interval: Duration,

    /// Maximum consecutive reconnect attempts before giving up.
    /// `None` means retry forever. The counter resets to zero on every
    /// successful open.
    pub max_retries: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            max_retries: None,
        }
    }
}

// ── ChannelState ─────────────────────────────────────────────────────

/// Lifecycle of one push channel, observable through a `watch` channel.
///
/// `Closed` is terminal: it is only published once the connection loop has
/// exited, either because the owner called [`PushChannelHandle::close`] or
/// because the retry budget ran out. Between attempts the channel reports
/// `Connecting` with the current retry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting { attempt: u32 },
    Open,
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Terminal — the loop has exited and no reconnect will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

// ── PushChannelHandle ────────────────────────────────────────────────

/// Handle to a running push channel.
///
/// Exclusively owned by the subscription or feed that opened it; dropping
/// the handle without calling [`close`](Self::close) leaves the background
/// loop running, so owners tear down explicitly.
pub struct PushChannelHandle {
    frames_rx: broadcast::Receiver<Arc<PushFrame>>,
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl PushChannelHandle {
    /// Validate the URL and spawn the connection loop.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Must be called from within a tokio runtime.
    pub fn open(url: &Url, config: ChannelConfig) -> Result<Self, Error> {
        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::ChannelConnect(e.to_string()))?;

        let (frames_tx, frames_rx) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting { attempt: 0 });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            channel_loop(uri, config, frames_tx, state_tx, outbound_rx, task_cancel).await;
        });

        Ok(Self {
            frames_rx,
            state_rx,
            outbound_tx,
            cancel,
        })
    }

    /// Get a new broadcast receiver for the frame stream.
    ///
    /// A consumer that falls behind receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn frames(&self) -> broadcast::Receiver<Arc<PushFrame>> {
        self.frames_rx.resubscribe()
    }

    /// Subscribe to channel state transitions.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// The state as of now.
    pub fn current_state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Transmit a text payload if the channel is open, else drop it.
    ///
    /// At-most-once, no queueing: anything sent while the channel is down
    /// is discarded rather than replayed on reconnect. Commands ride the
    /// REST surface, not this one, so lost sends here are tolerable.
    pub fn send(&self, payload: impl Into<String>) {
        if !self.current_state().is_open() {
            tracing::debug!("push channel not open, dropping outbound payload");
            return;
        }
        let _ = self.outbound_tx.send(payload.into());
    }

    /// Scoped teardown: disable further reconnects, cancel any pending
    /// reconnect timer, and abort an in-flight handshake. No frame or
    /// state-change delivery happens after the loop observes the signal.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → pump → on closure, wait a fixed interval →
/// reconnect, bounded by the retry budget.
async fn channel_loop(
    uri: tungstenite::http::Uri,
    config: ChannelConfig,
    frames_tx: broadcast::Sender<Arc<PushFrame>>,
    state_tx: watch::Sender<ChannelState>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let mut retries: u32 = 0;

    loop {
        state_tx.send_replace(ChannelState::Connecting { attempt: retries });

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = connect_and_pump(&uri, &frames_tx, &state_tx, &mut outbound_rx, &mut retries, &cancel) => r,
        };

        if cancel.is_cancelled() {
            break;
        }

        match result {
            // Clean disconnect and transport error take the same path:
            // the transport's closure is the single trigger for retry
            // scheduling, so nothing here can double-schedule.
            Ok(()) => tracing::info!("push channel disconnected"),
            Err(e) => tracing::warn!(error = %e, attempt = retries, "push channel error"),
        }

        // The transport is down from here on; the watch must not keep
        // reporting Open across the reconnect wait.
        state_tx.send_replace(ChannelState::Connecting { attempt: retries });

        if !config.auto_reconnect {
            break;
        }
        if let Some(max) = config.max_retries {
            if retries >= max {
                tracing::error!(max_retries = max, "push channel retry budget exhausted");
                break;
            }
        }

        tracing::info!(
            delay_ms = config.reconnect_interval.as_millis() as u64,
            attempt = retries,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.reconnect_interval) => {}
        }
        retries += 1;
    }

    state_tx.send_replace(ChannelState::Closed);
    tracing::debug!("push channel loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and pump frames until it drops.
///
/// Resets the retry counter once the handshake succeeds.
async fn connect_and_pump(
    uri: &tungstenite::http::Uri,
    frames_tx: &broadcast::Sender<Arc<PushFrame>>,
    state_tx: &watch::Sender<ChannelState>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    retries: &mut u32,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::debug!(uri = %uri, "connecting push channel");

    let request = ClientRequestBuilder::new(uri.clone());
    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::ChannelConnect(e.to_string()))?;

    *retries = 0;

    // Discard anything queued while the channel was down — sends are
    // at-most-once and must not replay on reconnect.
    while outbound_rx.try_recv().is_ok() {}

    state_tx.send_replace(ChannelState::Open);
    tracing::info!("push channel open");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_frame(text.as_str(), frames_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("push channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "push channel close frame received"
                            );
                        } else {
                            tracing::info!("push channel close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::ChannelConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("push channel stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame — ignore
                    }
                }
            }
            Some(payload) = outbound_rx.recv() => {
                if let Err(e) = write.send(tungstenite::Message::Text(payload.into())).await {
                    // The read half observes the closure; sends stay
                    // fire-and-forget.
                    tracing::debug!(error = %e, "push channel send failed");
                }
            }
        }
    }
}

// ── Frame dispatch ───────────────────────────────────────────────────

/// Parse a text frame as JSON and broadcast it.
///
/// Non-JSON frames are dropped with a diagnostic; they never close the
/// channel.
fn dispatch_frame(text: &str, frames_tx: &broadcast::Sender<Arc<PushFrame>>) {
    let payload: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "non-JSON push frame dropped");
            return;
        }
    };

    let frame = PushFrame {
        payload,
        received_at: Utc::now(),
    };

    // Ignore send errors — just means no active subscribers right now
    let _ = frames_tx.send(Arc::new(frame));
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_config() {
        let config = ChannelConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn state_predicates() {
        assert!(ChannelState::Open.is_open());
        assert!(!ChannelState::Open.is_terminal());
        assert!(ChannelState::Closed.is_terminal());
        assert!(!ChannelState::Connecting { attempt: 2 }.is_open());
    }

    #[test]
    fn dispatch_json_frame() {
        let (tx, mut rx) = broadcast::channel(16);

        dispatch_frame(r#"{"id": "light-12", "state": "on"}"#, &tx);

        let frame = rx.try_recv().expect("frame broadcast");
        assert_eq!(frame.payload["id"], "light-12");
        assert_eq!(frame.payload["state"], "on");
    }

    #[test]
    fn dispatch_drops_non_json() {
        let (tx, mut rx) = broadcast::channel::<Arc<PushFrame>>(16);

        dispatch_frame("not json at all", &tx);

        // Should not panic, should just log and skip
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_without_subscribers_does_not_panic() {
        let (tx, rx) = broadcast::channel::<Arc<PushFrame>>(16);
        drop(rx);
        dispatch_frame(r#"{"id": "x", "state": "off"}"#, &tx);
    }
}
