// ── Bridge configuration ──
//
// Connection policy for one bridge daemon. Loaded by the CLI from its
// config file / environment and handed to Bridge::new.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use coachdeck_api::channel::ChannelConfig;
use coachdeck_api::transport::TransportConfig;

use crate::error::CoreError;

/// Configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the bridge daemon, e.g. `http://coach.local:8080`.
    pub daemon_url: Url,

    /// Fixed delay between push channel reconnect attempts.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Reconnect budget per channel; `None` retries forever. Bounded in
    /// automated tests so a dead endpoint cannot loop silently.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Dashboard poll cadence while the status stream is down.
    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: u64,

    /// How long an optimistic update may await its confirming push
    /// before being flagged stale.
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// REST request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

fn default_status_poll_interval_secs() -> u64 {
    10
}

fn default_confirm_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl BridgeConfig {
    /// Defaults for a daemon at `daemon_url`.
    pub fn new(daemon_url: Url) -> Self {
        Self {
            daemon_url,
            reconnect_interval_secs: default_reconnect_interval_secs(),
            max_retries: None,
            status_poll_interval_secs: default_status_poll_interval_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            max_retries: self.max_retries,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..TransportConfig::default()
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Base URL for view stream endpoints (`ws://.../api/stream/`).
    pub fn stream_base(&self) -> Result<Url, CoreError> {
        let scheme = if self.daemon_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        let host = self
            .daemon_url
            .host_str()
            .ok_or_else(|| CoreError::Config("daemon URL has no host".into()))?;
        let prefix = self.daemon_url.path().trim_end_matches('/');

        let raw = match self.daemon_url.port() {
            Some(port) => format!("{scheme}://{host}:{port}{prefix}/api/stream/"),
            None => format!("{scheme}://{host}{prefix}/api/stream/"),
        };
        Url::parse(&raw).map_err(|e| CoreError::Config(format!("invalid stream base URL: {e}")))
    }

    /// The dashboard status stream endpoint.
    pub fn status_stream_url(&self) -> Result<Url, CoreError> {
        let base = self.stream_base()?;
        base.join("status")
            .map_err(|e| CoreError::Config(format!("invalid status stream URL: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::new(Url::parse("http://coach.local:8080").unwrap());
        assert_eq!(config.reconnect_interval_secs, 5);
        assert!(config.max_retries.is_none());
        assert_eq!(config.status_poll_interval_secs, 10);
        assert_eq!(config.confirm_timeout_secs, 10);
    }

    #[test]
    fn stream_base_maps_scheme_and_keeps_port() {
        let config = BridgeConfig::new(Url::parse("http://coach.local:8080").unwrap());
        assert_eq!(
            config.stream_base().unwrap().as_str(),
            "ws://coach.local:8080/api/stream/"
        );

        let tls = BridgeConfig::new(Url::parse("https://coach.local").unwrap());
        assert_eq!(tls.stream_base().unwrap().as_str(), "wss://coach.local/api/stream/");
    }

    #[test]
    fn stream_base_keeps_path_prefix() {
        let config = BridgeConfig::new(Url::parse("http://coach.local:8080/bridge/").unwrap());
        assert_eq!(
            config.stream_base().unwrap().as_str(),
            "ws://coach.local:8080/bridge/api/stream/"
        );
    }

    #[test]
    fn view_and_status_urls_join() {
        let config = BridgeConfig::new(Url::parse("http://coach.local:8080").unwrap());
        assert_eq!(
            config.status_stream_url().unwrap().as_str(),
            "ws://coach.local:8080/api/stream/status"
        );
        assert_eq!(
            config.stream_base().unwrap().join("lights").unwrap().as_str(),
            "ws://coach.local:8080/api/stream/lights"
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: BridgeConfig =
            toml_like(r#"{ "daemon_url": "http://coach.local:8080" }"#);
        assert_eq!(config.reconnect_interval_secs, 5);
        assert_eq!(config.request_timeout_secs, 30);
    }

    fn toml_like(json: &str) -> BridgeConfig {
        serde_json::from_str(json).unwrap()
    }
}
