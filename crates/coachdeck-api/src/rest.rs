//! Request/response client for the bridge daemon's REST surface.
//!
//! Two concerns live here: entity control commands
//! (`POST /api/entities/{id}/control`) and the three independent status
//! snapshot endpoints polled by the dashboard feed. The status endpoints
//! share no schema — each response type keeps unrecognized fields in a
//! flattened `extra` map so daemon additions survive a round-trip.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Request / response types ─────────────────────────────────────────

/// Body of an entity control request.
///
/// Command parameters are flattened to top level per the daemon's wire
/// contract: `{ "command": "set_brightness", "brightness": 40, ... }`.
/// The `request_id` lets the daemon's acknowledgement be correlated in
/// logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: String,
    pub request_id: Uuid,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ControlRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            request_id: Uuid::new_v4(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_params(
        command: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            command: command.into(),
            request_id: Uuid::new_v4(),
            params,
        }
    }
}

/// Daemon acknowledgement of a control request.
///
/// Acceptance is not confirmation — the authoritative result arrives as a
/// push update for the commanded entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ControlAck {
    /// A missing status field counts as accepted — the daemon only names
    /// a status when it has something to say.
    pub fn accepted(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|s| s == "ok" || s == "accepted")
    }
}

/// `GET /api/status/server` — daemon process status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `GET /api/status/health` — application health counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCounters {
    #[serde(default)]
    pub entities_tracked: Option<u64>,
    #[serde(default)]
    pub frames_decoded: Option<u64>,
    #[serde(default)]
    pub decode_errors: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `GET /api/status/interfaces` — per-interface bus counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceCounters {
    #[serde(default)]
    pub interfaces: Vec<BusInterface>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Counters for one control-bus interface (e.g. `can0`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusInterface {
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub rx_frames: u64,
    #[serde(default)]
    pub tx_frames: u64,
    #[serde(default)]
    pub error_frames: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── DaemonClient ─────────────────────────────────────────────────────

/// HTTP client for the bridge daemon.
///
/// Cheaply cloneable (shares the underlying connection pool).
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base: Url,
}

impl DaemonClient {
    /// Build a client for the daemon at `base`.
    pub fn new(base: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let mut base = base;
        // Url::join drops the last path segment without this.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: transport.build_client()?,
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Issue an entity control command.
    ///
    /// A non-2xx status decodes into [`Error::Api`]; network failures
    /// surface as [`Error::Transport`]. Neither mutates any client-side
    /// state — that is the caller's rollback decision.
    pub async fn control(&self, entity_id: &str, request: &ControlRequest) -> Result<ControlAck, Error> {
        let url = self.base.join(&format!("api/entities/{entity_id}/control"))?;
        tracing::debug!(entity = entity_id, command = %request.command, "sending control request");
        let response = self.http.post(url).json(request).send().await?;
        decode(response).await
    }

    /// Fetch daemon process status.
    pub async fn server_status(&self) -> Result<ServerStatus, Error> {
        self.get_json("api/status/server").await
    }

    /// Fetch application health counters.
    pub async fn health(&self) -> Result<HealthCounters, Error> {
        self.get_json("api/status/health").await
    }

    /// Fetch control-bus interface counters.
    pub async fn bus_interfaces(&self) -> Result<InterfaceCounters, Error> {
        self.get_json("api/status/interfaces").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base.join(path)?;
        let response = self.http.get(url).send().await?;
        decode(response).await
    }
}

// ── Response decoding ────────────────────────────────────────────────

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = extract_error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        });
        return Err(Error::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

/// Pull a human-readable message out of a daemon error body, which is
/// either `{"error": "..."}` or `{"message": "..."}`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .map(String::from)
}

// ── Tests ────────────────────────────────────────────────────────────
