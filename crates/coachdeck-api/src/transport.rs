// Shared transport configuration for building reqwest::Client instances.
//
// The control and status clients share timeout settings through this
// module, avoiding duplicated builder logic.

use std::time::Duration;

const USER_AGENT: &str = concat!("coachdeck/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
///
/// The bridge daemon is a plain-HTTP service on the coach LAN, so the
/// knobs here are timing only. There is no request timeout on push-channel
/// sends (fire-and-forget); these timeouts apply to REST calls.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall request timeout.
    pub timeout: Duration,
    /// TCP connect timeout, kept short so a powered-down daemon fails fast.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(client)
    }
}
