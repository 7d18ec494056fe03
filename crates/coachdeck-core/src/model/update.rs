// ── Validated partial updates ──
//
// Every wire payload is normalized into an EntityUpdate before anything
// touches the store. Malformed payloads fail here, at the boundary, and
// are dropped by the reconciler — they never close the channel.

use std::collections::BTreeSet;

use crate::error::CoreError;
use crate::model::entity::{EntityId, RecordOrigin};

/// Top-level frame keys with dedicated fields; everything else folds
/// into `attributes` so daemon additions survive unseen.
const KNOWN_KEYS: &[&str] = &[
    "id",
    "state",
    "kind",
    "name",
    "area",
    "capabilities",
    "attributes",
];

/// A partial update for one entity, from either the push channel or the
/// optimistic command path.
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    pub id: EntityId,
    /// Full overwrite when present; push frames always carry one.
    pub state: Option<String>,
    pub kind: Option<String>,
    pub display_name: Option<String>,
    pub area: Option<String>,
    pub capabilities: Option<BTreeSet<String>>,
    /// Shallow key overwrite — merging is last-write-wins per key.
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub origin: RecordOrigin,
}

impl EntityUpdate {
    /// Validate a raw push frame.
    ///
    /// Requires a non-empty string `id` and a string `state`; anything
    /// else is a malformed frame. Unrecognized top-level fields are
    /// preserved in `attributes` rather than discarded.
    pub fn from_frame(payload: &serde_json::Value) -> Result<Self, CoreError> {
        let object = payload
            .as_object()
            .ok_or_else(|| malformed("payload is not a JSON object"))?;

        let id = object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing entity id"))?;

        let state = object
            .get("state")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| malformed("missing state field"))?;

        let string_field = |key: &str| {
            object
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(String::from)
        };

        let capabilities = object
            .get("capabilities")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect::<BTreeSet<_>>()
            });

        let mut attributes = object
            .get("attributes")
            .and_then(serde_json::Value::as_object)
            .cloned()
            .unwrap_or_default();

        // Forward compatibility: unknown top-level fields become
        // attributes. Explicit attributes win over a top-level duplicate.
        for (key, value) in object {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                attributes.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        normalize_brightness(&mut attributes);

        Ok(Self {
            id: EntityId::from(id),
            state: Some(state.to_owned()),
            kind: string_field("kind"),
            display_name: string_field("name"),
            area: string_field("area"),
            capabilities,
            attributes,
            origin: RecordOrigin::Daemon,
        })
    }

    /// A locally-predicted update awaiting daemon confirmation.
    pub fn optimistic(
        id: EntityId,
        state: Option<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id,
            state,
            kind: None,
            display_name: None,
            area: None,
            capabilities: None,
            attributes,
            origin: RecordOrigin::Optimistic,
        }
    }
}

fn malformed(reason: &str) -> CoreError {
    CoreError::MalformedFrame {
        reason: reason.to_owned(),
    }
}

/// Canonical brightness is percent 0–100. The bus reports half-percent
/// steps 0–200 under `brightness_raw`; an explicit `brightness` value
/// from the daemon wins over the raw scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn normalize_brightness(attributes: &mut serde_json::Map<String, serde_json::Value>) {
    let Some(raw) = attributes.remove("brightness_raw") else {
        return;
    };
    if attributes.contains_key("brightness") {
        return;
    }
    if let Some(value) = raw.as_f64() {
        let percent = (value / 2.0).round().clamp(0.0, 100.0);
        attributes.insert("brightness".into(), serde_json::Value::from(percent as u64));
    }
}
