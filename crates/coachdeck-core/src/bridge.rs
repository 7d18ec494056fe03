// ── Bridge facade ──
//
// Wires one explicitly-constructed EntityStore to the REST client, the
// subscription controller, and the reconciler task. Views hold a Bridge
// clone, read snapshots, and issue commands; they never write the store.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use coachdeck_api::channel::PushChannelHandle;
use coachdeck_api::rest::{ControlAck, ControlRequest, DaemonClient};

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::{EntityId, EntityRecord, EntityUpdate};
use crate::reconcile::EntityReconciler;
use crate::status::HybridStatusFeed;
use crate::store::EntityStore;
use crate::subscription::{SubscriptionController, SubscriptionState};

const NOTICE_CHANNEL_SIZE: usize = 64;

// ── Notices ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Transient, user-visible notification (command failures, channel
/// loss). Never carries entity state — the store is the only source of
/// that.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

// ── Bridge ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`. Construction spawns only
/// the reconciler ingest task; sockets open when views activate.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    store: Arc<EntityStore>,
    client: DaemonClient,
    subscriptions: SubscriptionController,
    reconciler: Arc<EntityReconciler>,
    notices: broadcast::Sender<Notice>,
    cancel: CancellationToken,
}

impl Bridge {
    /// Create a bridge with its own store.
    pub fn new(config: BridgeConfig) -> Result<Self, CoreError> {
        Self::with_store(config, Arc::new(EntityStore::new()))
    }

    /// Create a bridge around an existing store instance.
    ///
    /// The store is injected rather than global, preserving the
    /// single-writer property: only this bridge's reconciler writes it.
    pub fn with_store(config: BridgeConfig, store: Arc<EntityStore>) -> Result<Self, CoreError> {
        let client = DaemonClient::new(config.daemon_url.clone(), &config.transport())?;
        let cancel = CancellationToken::new();

        let reconciler = EntityReconciler::spawn(
            Arc::clone(&store),
            config.confirm_timeout(),
            cancel.child_token(),
        );

        let subscriptions = SubscriptionController::new(
            config.stream_base()?,
            config.channel_config(),
            reconciler.ingest_sender(),
            cancel.child_token(),
        );

        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                store,
                client,
                subscriptions,
                reconciler,
                notices,
                cancel,
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    // ── View subscriptions ───────────────────────────────────────

    /// Activate a view's push subscription (idempotent while live).
    pub fn activate_view(&self, view: &str) -> Result<SubscriptionState, CoreError> {
        self.inner.subscriptions.activate(view)
    }

    /// Deactivate a view, closing its channel.
    pub fn deactivate_view(&self, view: &str) {
        self.inner.subscriptions.deactivate(view);
    }

    pub fn view_state(&self, view: &str) -> SubscriptionState {
        self.inner.subscriptions.state(view)
    }

    pub fn active_views(&self) -> Vec<String> {
        self.inner.subscriptions.active_views()
    }

    // ── Entity reads (store delegation) ──────────────────────────

    pub fn entities(&self) -> Arc<Vec<Arc<EntityRecord>>> {
        self.inner.store.all()
    }

    pub fn entity(&self, id: &EntityId) -> Option<Arc<EntityRecord>> {
        self.inner.store.get(id)
    }

    pub fn subscribe_entities(&self) -> watch::Receiver<Arc<Vec<Arc<EntityRecord>>>> {
        self.inner.store.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Issue an entity control command with the optimistic-update flow.
    ///
    /// For commands with a predictable outcome the store is updated
    /// immediately; the daemon's push update remains authoritative and
    /// overwrites the prediction when it lands. On HTTP failure or a
    /// daemon rejection, the pre-command record is restored and a notice
    /// is broadcast — the store never keeps a value the daemon refused.
    pub async fn control(
        &self,
        id: &EntityId,
        command: &str,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ControlAck, CoreError> {
        if self.inner.store.get(id).is_none() {
            return Err(CoreError::UnknownEntity(id.clone()));
        }

        let token = predict_outcome(command, &params).and_then(|(state, attributes)| {
            self.inner
                .reconciler
                .begin_optimistic(EntityUpdate::optimistic(id.clone(), Some(state), attributes))
        });

        let request = ControlRequest::with_params(command, params);
        match self.inner.client.control(id.as_str(), &request).await {
            Ok(ack) if ack.accepted() => Ok(ack),
            Ok(ack) => {
                if let Some(token) = token {
                    self.inner.reconciler.rollback(token);
                }
                let message = ack.status.clone().unwrap_or_else(|| "rejected".into());
                self.notify(
                    NoticeLevel::Error,
                    format!("command '{command}' rejected for {id}: {message}"),
                );
                Err(CoreError::CommandRejected {
                    entity: id.clone(),
                    command: command.to_owned(),
                    message,
                })
            }
            Err(e) => {
                if let Some(token) = token {
                    self.inner.reconciler.rollback(token);
                }
                self.notify(
                    NoticeLevel::Error,
                    format!("command '{command}' failed for {id}: {e}"),
                );
                Err(e.into())
            }
        }
    }

    // ── Status feed ──────────────────────────────────────────────

    /// Build the dashboard's hybrid status feed.
    ///
    /// The feed opens and exclusively owns its push channel on the
    /// daemon's status stream; polling uses this bridge's REST client.
    pub fn status_feed(&self) -> Result<HybridStatusFeed, CoreError> {
        let url = self.inner.config.status_stream_url()?;
        let channel = PushChannelHandle::open(&url, self.inner.config.channel_config())?;

        let feed = HybridStatusFeed::spawn(
            self.inner.client.clone(),
            self.inner.config.status_poll_interval(),
            channel.state(),
            channel.frames(),
            self.inner.cancel.child_token(),
        );
        Ok(feed.with_channel(channel))
    }

    // ── Observation / teardown ───────────────────────────────────

    /// Subscribe to transient user-visible notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Cancel every owned task and close every subscription channel.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.subscriptions.shutdown();
        tracing::debug!("bridge shut down");
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        tracing::warn!("{message}");
        let _ = self.inner.notices.send(Notice { level, message });
    }
}

// ── Outcome prediction ──────────────────────────────────────────────

/// Predicted post-command state for commands with an obvious outcome.
///
/// Unknown commands get no optimistic update — the daemon's push is the
/// first visible effect.
fn predict_outcome(
    command: &str,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Option<(String, serde_json::Map<String, serde_json::Value>)> {
    match command {
        "on" => Some(("on".into(), serde_json::Map::new())),
        "off" => Some(("off".into(), serde_json::Map::new())),
        "lock" => Some(("locked".into(), serde_json::Map::new())),
        "unlock" => Some(("unlocked".into(), serde_json::Map::new())),
        "set_brightness" => {
            let brightness = params.get("brightness")?.clone();
            let mut attributes = serde_json::Map::new();
            attributes.insert("brightness".into(), brightness);
            Some(("on".into(), attributes))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seeded_bridge(daemon_url: Url) -> Bridge {
        let bridge = Bridge::new(BridgeConfig::new(daemon_url)).unwrap();
        bridge.store().merge(
            EntityUpdate::from_frame(&json!({
                "id": "lamp-1",
                "state": "off",
                "kind": "light",
            }))
            .unwrap(),
        );
        bridge
    }

    fn confirm_frame(state: &str) -> coachdeck_api::channel::PushFrame {
        coachdeck_api::channel::PushFrame {
            payload: json!({ "id": "lamp-1", "state": state }),
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn control_on_unknown_entity_is_refused() {
        let bridge =
            Bridge::new(BridgeConfig::new(Url::parse("http://127.0.0.1:9").unwrap())).unwrap();

        let err = bridge
            .control(&"ghost-9".into(), "on", serde_json::Map::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::UnknownEntity(_)));
    }

    #[tokio::test]
    async fn network_failure_restores_pre_command_state() {
        // Bind a port and drop the listener so connections are refused.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let bridge = seeded_bridge(Url::parse(&format!("http://127.0.0.1:{port}")).unwrap());
        let mut notices = bridge.notices();

        let err = bridge
            .control(&"lamp-1".into(), "on", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Api(_)));

        let record = bridge.entity(&"lamp-1".into()).unwrap();
        assert_eq!(record.state, "off", "failed command must not stick");
        assert_eq!(record.origin, crate::model::RecordOrigin::Daemon);

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("lamp-1"));
    }

    #[tokio::test]
    async fn accepted_command_stays_optimistic_until_push_confirms() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entities/lamp-1/control"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .mount(&server)
            .await;

        let bridge = seeded_bridge(Url::parse(&server.uri()).unwrap());

        let ack = bridge
            .control(&"lamp-1".into(), "on", serde_json::Map::new())
            .await
            .unwrap();
        assert!(ack.accepted());

        let record = bridge.entity(&"lamp-1".into()).unwrap();
        assert_eq!(record.state, "on");
        assert_eq!(record.origin, crate::model::RecordOrigin::Optimistic);

        // Daemon confirmation overwrites the prediction as authoritative.
        bridge.inner.reconciler.apply_frame(&confirm_frame("on"));
        let record = bridge.entity(&"lamp-1".into()).unwrap();
        assert_eq!(record.origin, crate::model::RecordOrigin::Daemon);
    }

    #[tokio::test]
    async fn daemon_rejection_rolls_back_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entities/lamp-1/control"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "status": "rejected" })),
            )
            .mount(&server)
            .await;

        let bridge = seeded_bridge(Url::parse(&server.uri()).unwrap());
        let mut notices = bridge.notices();

        let err = bridge
            .control(&"lamp-1".into(), "on", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommandRejected { .. }));

        assert_eq!(bridge.entity(&"lamp-1".into()).unwrap().state, "off");
        assert!(notices.try_recv().is_ok());
    }

    #[tokio::test]
    async fn injected_store_is_shared() {
        let store = Arc::new(EntityStore::new());
        store.merge(
            EntityUpdate::from_frame(&json!({ "id": "tank-2", "state": "ok" })).unwrap(),
        );

        let bridge = Bridge::with_store(
            BridgeConfig::new(Url::parse("http://127.0.0.1:9").unwrap()),
            Arc::clone(&store),
        )
        .unwrap();

        assert!(bridge.entity(&"tank-2".into()).is_some());
        assert_eq!(bridge.entities().len(), 1);
    }

    #[test]
    fn predicts_switch_and_lock_outcomes() {
        let empty = serde_json::Map::new();
        assert_eq!(predict_outcome("on", &empty).unwrap().0, "on");
        assert_eq!(predict_outcome("off", &empty).unwrap().0, "off");
        assert_eq!(predict_outcome("lock", &empty).unwrap().0, "locked");
        assert_eq!(predict_outcome("unlock", &empty).unwrap().0, "unlocked");
    }

    #[test]
    fn predicts_brightness_with_attribute() {
        let mut params = serde_json::Map::new();
        params.insert("brightness".into(), json!(40));

        let (state, attributes) = predict_outcome("set_brightness", &params).unwrap();
        assert_eq!(state, "on");
        assert_eq!(attributes["brightness"], 40);
    }

    #[test]
    fn unknown_commands_get_no_prediction() {
        assert!(predict_outcome("calibrate", &serde_json::Map::new()).is_none());
        // set_brightness without the parameter is unpredictable too.
        assert!(predict_outcome("set_brightness", &serde_json::Map::new()).is_none());
    }
}
