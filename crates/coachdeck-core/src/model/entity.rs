// ── Core entity types ──
//
// EntityId and EntityRecord are the foundation of the reconciliation
// layer. The daemon assigns ids; the client never invents them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── EntityId ────────────────────────────────────────────────────────

/// Stable identifier for a daemon entity, e.g. `"light-12"`.
///
/// Opaque to the client: the daemon derives ids from its device mapping
/// and they are unique within one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── Entity kinds ────────────────────────────────────────────────────

/// Well-known entity kinds.
///
/// Deliberately not an enum: the daemon may introduce new kinds and the
/// client must carry them through untouched.
pub mod kind {
    pub const LIGHT: &str = "light";
    pub const LOCK: &str = "lock";
    pub const SENSOR: &str = "sensor";
    pub const TANK: &str = "tank";
    pub const UNKNOWN: &str = "unknown";
}

/// The state value a record carries before the daemon has reported one.
pub const STATE_UNKNOWN: &str = "unknown";

// ── RecordOrigin ────────────────────────────────────────────────────

/// Where the current record values came from.
///
/// Client-side bookkeeping only — never parsed from the wire. Drives the
/// staleness indicator: an optimistic value that outlives its
/// confirmation window is flagged, not silently reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrigin {
    /// Confirmed by the daemon (push update).
    #[default]
    Daemon,
    /// Local prediction awaiting daemon confirmation.
    Optimistic,
    /// Local prediction whose confirmation window expired.
    OptimisticStale,
}

// ── EntityRecord ────────────────────────────────────────────────────

/// Last-known state of one controllable or observable device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,

    /// Open-ended kind tag ("light", "lock", "sensor", ...).
    pub kind: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub area: Option<String>,

    /// Declares which optional attributes and actions are meaningful.
    /// Renderers must not require an attribute whose capability is
    /// absent.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Primary observable status. Always present, `"unknown"` if the
    /// daemon has never reported one.
    pub state: String,

    /// Secondary values, shape dependent on `kind`/`capabilities`.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Store-assigned monotonic sequence, stamped on every merge.
    /// Resolves ordering when two updates for the same id race.
    #[serde(default)]
    pub revision: u64,

    #[serde(skip)]
    pub origin: RecordOrigin,

    /// Local time of the last applied update.
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// A placeholder record for an id the daemon has named but not yet
    /// described.
    pub fn unknown(id: EntityId) -> Self {
        Self {
            id,
            kind: kind::UNKNOWN.to_owned(),
            display_name: None,
            area: None,
            capabilities: BTreeSet::new(),
            state: STATE_UNKNOWN.to_owned(),
            attributes: serde_json::Map::new(),
            revision: 0,
            origin: RecordOrigin::Daemon,
            updated_at: Utc::now(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Current value still awaits (or has outlived) daemon confirmation.
    pub fn is_stale(&self) -> bool {
        self.origin == RecordOrigin::OptimisticStale
    }

    /// Brightness percent, only for entities declaring the capability.
    pub fn brightness(&self) -> Option<u64> {
        if !self.has_capability("brightness") {
            return None;
        }
        self.attributes.get("brightness").and_then(serde_json::Value::as_u64)
    }
}
