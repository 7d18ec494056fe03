//! Reconciliation layer between `coachdeck-api` and UI consumers.
//!
//! This crate owns the client-side view of the bridge daemon's entity
//! state and the machinery that keeps it consistent across an unreliable
//! push channel, a fallback poll channel, and locally-issued commands:
//!
//! - **[`Bridge`]** — Central facade wiring an explicitly constructed
//!   [`EntityStore`] to the REST client, the subscription controller, and
//!   the reconciler task. [`Bridge::control`] runs the optimistic-update
//!   flow: predict, apply, issue, roll back on failure, let the daemon's
//!   push confirmation overwrite.
//!
//! - **[`EntityStore`]** — Canonical entity storage (`DashMap` +
//!   `tokio::sync::watch` snapshots). All writes funnel through the
//!   reconciler, so the store is single-writer-effective while any number
//!   of views read snapshots.
//!
//! - **[`EntityReconciler`](reconcile::EntityReconciler)** — Validates raw
//!   push frames at the channel boundary, merges well-formed updates in
//!   arrival order, and tracks pending optimistic updates with per-update
//!   stale timers.
//!
//! - **[`SubscriptionController`]** — Binds view visibility to push
//!   channel lifecycle: one owned socket per active view, idempotent
//!   activation, scoped deactivation.
//!
//! - **[`HybridStatusFeed`](status::HybridStatusFeed)** — Dashboard data
//!   source that prefers the daemon's status stream and degrades to
//!   fixed-interval polling, without ever running both at once.

pub mod bridge;
pub mod config;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, Notice, NoticeLevel};
pub use config::BridgeConfig;
pub use error::CoreError;
pub use model::{EntityId, EntityRecord, EntityUpdate, RecordOrigin};
pub use status::{FeedMode, HybridStatusFeed, StatusBoard, StatusFetch};
pub use store::EntityStore;
pub use subscription::{SubscriptionController, SubscriptionState};
