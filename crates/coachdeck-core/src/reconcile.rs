//! Entity reconciliation — the single writer behind the store.
//!
//! A background ingest task consumes raw push frames in arrival order,
//! validates them at the boundary, and merges the survivors into the
//! [`EntityStore`]. The same component tracks locally-issued optimistic
//! updates: each one is registered with a generation and a cancellable
//! stale timer, and any authoritative push update for the entity cancels
//! it — push always wins over a prediction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use coachdeck_api::channel::PushFrame;

use crate::model::{EntityId, EntityRecord, EntityUpdate};
use crate::store::EntityStore;

/// One in-flight optimistic update, keyed by entity id.
///
/// The generation distinguishes this command from any later one for the
/// same entity, so a stale timer or rollback from an earlier command can
/// never clobber a newer prediction.
struct PendingCommand {
    generation: u64,
    rollback: Arc<EntityRecord>,
}

/// Token returned by [`EntityReconciler::begin_optimistic`]; redeemed by
/// `rollback` when the command's HTTP leg fails.
#[derive(Debug)]
pub(crate) struct OptimisticToken {
    id: EntityId,
    generation: u64,
}

/// Consumes push frames and local command predictions, applying both to
/// the store under the precedence rules.
pub struct EntityReconciler {
    store: Arc<EntityStore>,
    pending: DashMap<EntityId, PendingCommand>,
    generation: AtomicU64,
    confirm_timeout: Duration,
    cancel: CancellationToken,
    ingest_tx: mpsc::UnboundedSender<Arc<PushFrame>>,
}

impl EntityReconciler {
    /// Create the reconciler and spawn its ingest task.
    ///
    /// All writes to the store funnel through the returned instance;
    /// subscription forwarders feed [`ingest_sender`](Self::ingest_sender)
    /// and the single consumer preserves arrival order per channel.
    pub fn spawn(
        store: Arc<EntityStore>,
        confirm_timeout: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();

        let reconciler = Arc::new(Self {
            store,
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            confirm_timeout,
            cancel,
            ingest_tx,
        });

        let task = Arc::clone(&reconciler);
        tokio::spawn(async move {
            ingest_task(task, ingest_rx).await;
        });

        reconciler
    }

    /// Sender side of the ingest queue, handed to subscription
    /// forwarders.
    pub fn ingest_sender(&self) -> mpsc::UnboundedSender<Arc<PushFrame>> {
        self.ingest_tx.clone()
    }

    /// Validate and apply one push frame.
    ///
    /// Malformed payloads are logged and dropped without touching the
    /// store; a bad frame never terminates the channel. A well-formed
    /// update cancels any pending optimistic entry for its entity — the
    /// push value is authoritative, the optimistic one was a prediction.
    pub fn apply_frame(&self, frame: &PushFrame) {
        match EntityUpdate::from_frame(&frame.payload) {
            Ok(update) => {
                self.pending.remove(&update.id);
                self.store.merge(update);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed push frame");
            }
        }
    }

    /// Apply an optimistic prediction and arm its stale timer.
    ///
    /// Returns `None` when the entity is unknown — callers reject the
    /// command before any store mutation. The timer is tied to this
    /// update's generation: a confirming push or a newer command makes it
    /// a no-op when it fires.
    pub(crate) fn begin_optimistic(
        self: &Arc<Self>,
        update: EntityUpdate,
    ) -> Option<OptimisticToken> {
        let id = update.id.clone();
        let rollback = self.store.get(&id)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.insert(
            id.clone(),
            PendingCommand {
                generation,
                rollback,
            },
        );
        self.store.merge(update);

        let reconciler = Arc::clone(self);
        let timer_id = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = reconciler.cancel.cancelled() => {}
                () = tokio::time::sleep(reconciler.confirm_timeout) => {
                    reconciler.flag_unconfirmed(&timer_id, generation);
                }
            }
        });

        Some(OptimisticToken { id, generation })
    }

    /// Restore the pre-command record after a failed command request.
    ///
    /// A no-op when a push update or newer command has already replaced
    /// the pending entry.
    pub(crate) fn rollback(&self, token: OptimisticToken) {
        let removed = self
            .pending
            .remove_if(&token.id, |_, pending| pending.generation == token.generation);
        if let Some((_, pending)) = removed {
            tracing::debug!(entity = %token.id, "rolling back unacknowledged optimistic update");
            self.store.put((*pending.rollback).clone());
        }
    }

    /// Stale-timer body: the optimistic value stays in place but is
    /// flagged for the UI — never silently reverted without knowing the
    /// real state.
    fn flag_unconfirmed(&self, id: &EntityId, generation: u64) {
        let still_pending = self
            .pending
            .get(id)
            .is_some_and(|pending| pending.generation == generation);
        if still_pending && self.store.mark_stale(id) {
            tracing::warn!(entity = %id, "optimistic update unconfirmed within timeout, flagged stale");
        }
    }

    #[cfg(test)]
    fn has_pending(&self, id: &EntityId) -> bool {
        self.pending.contains_key(id)
    }
}

/// Single consumer of the ingest queue.
async fn ingest_task(
    reconciler: Arc<EntityReconciler>,
    mut ingest_rx: mpsc::UnboundedReceiver<Arc<PushFrame>>,
) {
    loop {
        tokio::select! {
            biased;
            () = reconciler.cancel.cancelled() => break,
            frame = ingest_rx.recv() => {
                let Some(frame) = frame else { break };
                reconciler.apply_frame(&frame);
            }
        }
    }
    tracing::debug!("reconciler ingest task exiting");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::RecordOrigin;
    use chrono::Utc;
    use serde_json::json;

    fn frame(payload: serde_json::Value) -> PushFrame {
        PushFrame {
            payload,
            received_at: Utc::now(),
        }
    }

    fn reconciler_with(
        confirm_timeout: Duration,
    ) -> (Arc<EntityReconciler>, Arc<EntityStore>, CancellationToken) {
        let store = Arc::new(EntityStore::new());
        let cancel = CancellationToken::new();
        let reconciler = EntityReconciler::spawn(Arc::clone(&store), confirm_timeout, cancel.clone());
        (reconciler, store, cancel)
    }

    fn seed_light(store: &EntityStore) {
        store.merge(
            EntityUpdate::from_frame(&json!({
                "id": "lamp-1",
                "state": "off",
                "kind": "light",
            }))
            .unwrap(),
        );
    }

    #[tokio::test]
    async fn malformed_frame_leaves_store_untouched() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));

        reconciler.apply_frame(&frame(json!({ "foo": 1 })));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn well_formed_frame_merges() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));

        reconciler.apply_frame(&frame(json!({ "id": "lamp-1", "state": "on" })));

        assert_eq!(store.get(&"lamp-1".into()).unwrap().state, "on");
    }

    #[tokio::test]
    async fn push_update_overwrites_optimistic_value() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        let _token = reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();
        assert_eq!(store.get(&"lamp-1".into()).unwrap().origin, RecordOrigin::Optimistic);

        // The daemon reports a different outcome than predicted.
        reconciler.apply_frame(&frame(json!({ "id": "lamp-1", "state": "off" })));

        let record = store.get(&"lamp-1".into()).unwrap();
        assert_eq!(record.state, "off");
        assert_eq!(record.origin, RecordOrigin::Daemon);
        assert!(!reconciler.has_pending(&"lamp-1".into()));
    }

    #[tokio::test]
    async fn rollback_restores_pre_command_record() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        let token = reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();
        assert_eq!(store.get(&"lamp-1".into()).unwrap().state, "on");

        reconciler.rollback(token);

        let record = store.get(&"lamp-1".into()).unwrap();
        assert_eq!(record.state, "off");
        assert_eq!(record.origin, RecordOrigin::Daemon);
    }

    #[tokio::test]
    async fn rollback_after_confirmation_is_a_no_op() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        let token = reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();

        // Daemon confirms before the HTTP leg reports failure (e.g. a
        // timeout on the ack while the bus command actually landed).
        reconciler.apply_frame(&frame(json!({ "id": "lamp-1", "state": "on" })));
        reconciler.rollback(token);

        assert_eq!(store.get(&"lamp-1".into()).unwrap().state, "on");
    }

    #[tokio::test]
    async fn optimistic_on_unknown_entity_is_refused() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));

        let token = reconciler.begin_optimistic(EntityUpdate::optimistic(
            "ghost-9".into(),
            Some("on".into()),
            serde_json::Map::new(),
        ));

        assert!(token.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_optimistic_update_is_flagged_stale() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let record = store.get(&"lamp-1".into()).unwrap();
        assert!(record.is_stale());
        // The value is flagged, not reverted.
        assert_eq!(record.state, "on");
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_cancels_the_stale_timer() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();
        reconciler.apply_frame(&frame(json!({ "id": "lamp-1", "state": "on" })));

        tokio::time::sleep(Duration::from_secs(11)).await;

        let record = store.get(&"lamp-1".into()).unwrap();
        assert_eq!(record.origin, RecordOrigin::Daemon);
        assert!(!record.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_command_supersedes_earlier_stale_timer() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        seed_light(&store);

        reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("on".into()),
                serde_json::Map::new(),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        // Second command replaces the pending entry with a new
        // generation; the first timer must not flag it.
        reconciler
            .begin_optimistic(EntityUpdate::optimistic(
                "lamp-1".into(),
                Some("off".into()),
                serde_json::Map::new(),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            store.get(&"lamp-1".into()).unwrap().origin,
            RecordOrigin::Optimistic,
            "first command's timer fired against the second command's update"
        );

        // The second command's own window then expires.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.get(&"lamp-1".into()).unwrap().is_stale());
    }

    #[tokio::test]
    async fn ingest_queue_preserves_arrival_order() {
        let (reconciler, store, _cancel) = reconciler_with(Duration::from_secs(10));
        let ingest = reconciler.ingest_sender();

        ingest.send(Arc::new(frame(json!({ "id": "lamp-1", "state": "on" })))).unwrap();
        ingest.send(Arc::new(frame(json!({ "id": "lamp-1", "state": "off" })))).unwrap();

        // Wait for the single consumer to drain both frames.
        let mut version = store.subscribe_version();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *version.borrow_and_update() < 2 {
                version.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(store.get(&"lamp-1".into()).unwrap().state, "off");
    }
}
