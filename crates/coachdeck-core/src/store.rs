// ── Canonical entity store ──
//
// Lock-free concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels. Single-writer-effective: every
// mutation funnels through the reconciler, while any number of views
// read snapshots concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{EntityId, EntityRecord, EntityUpdate, RecordOrigin};

/// In-memory mapping from entity id to last-known record.
///
/// Uses `DashMap` for concurrent lookups and `watch` channels for change
/// notification. Every mutation bumps a version counter and rebuilds the
/// snapshot subscribers receive — `watch` semantics coalesce a burst of
/// mutations into a single wakeup for a slow reader, which bounds render
/// cost under update storms.
pub struct EntityStore {
    records: DashMap<EntityId, Arc<EntityRecord>>,

    /// Monotonic revision source stamped onto every written record.
    next_revision: AtomicU64,

    /// Mutation counter, bumped on every write.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation, ordered by id for stable
    /// rendering.
    snapshot: watch::Sender<Arc<Vec<Arc<EntityRecord>>>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            records: DashMap::new(),
            next_revision: AtomicU64::new(0),
            version,
            snapshot,
        }
    }

    /// Insert or replace the record for `record.id`.
    pub fn put(&self, record: EntityRecord) -> Arc<EntityRecord> {
        let mut record = record;
        record.revision = self.bump_revision();
        let record = Arc::new(record);
        self.records.insert(record.id.clone(), Arc::clone(&record));
        self.publish();
        record
    }

    /// Look up the current record for an id.
    pub fn get(&self, id: &EntityId) -> Option<Arc<EntityRecord>> {
        self.records.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Apply a partial update: shallow key overwrite of `attributes`,
    /// full overwrite of `state` and descriptors when present. An unseen
    /// id inserts a fresh record.
    ///
    /// Unconditionally last-write-wins per field, so applying the same
    /// update twice yields the same resulting values as applying it once.
    pub fn merge(&self, update: EntityUpdate) -> Arc<EntityRecord> {
        let mut record = self
            .records
            .get(&update.id)
            .map_or_else(|| EntityRecord::unknown(update.id.clone()), |r| (**r).clone());

        if let Some(state) = update.state {
            record.state = state;
        }
        if let Some(kind) = update.kind {
            record.kind = kind;
        }
        if let Some(name) = update.display_name {
            record.display_name = Some(name);
        }
        if let Some(area) = update.area {
            record.area = Some(area);
        }
        if let Some(capabilities) = update.capabilities {
            record.capabilities = capabilities;
        }
        for (key, value) in update.attributes {
            record.attributes.insert(key, value);
        }
        record.origin = update.origin;
        record.revision = self.bump_revision();
        record.updated_at = Utc::now();

        let record = Arc::new(record);
        self.records.insert(record.id.clone(), Arc::clone(&record));
        self.publish();
        record
    }

    /// Flag an unconfirmed optimistic value as stale. No-op for records
    /// the daemon has since confirmed. Returns whether a flag was set.
    pub(crate) fn mark_stale(&self, id: &EntityId) -> bool {
        let Some(existing) = self.get(id) else {
            return false;
        };
        if existing.origin != RecordOrigin::Optimistic {
            return false;
        }
        let mut record = (*existing).clone();
        record.origin = RecordOrigin::OptimisticStale;
        record.revision = self.bump_revision();
        self.records.insert(record.id.clone(), Arc::new(record));
        self.publish();
        true
    }

    /// Current snapshot of every record, ordered by id (cheap `Arc`
    /// clone).
    pub fn all(&self) -> Arc<Vec<Arc<EntityRecord>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<EntityRecord>>>> {
        self.snapshot.subscribe()
    }

    /// Subscribe to the raw mutation counter.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn bump_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Rebuild the snapshot and bump the version counter.
    fn publish(&self) {
        let mut values: Vec<Arc<EntityRecord>> =
            self.records.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
