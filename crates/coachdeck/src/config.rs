//! CLI configuration — config file + environment, resolved into a
//! [`BridgeConfig`] with CLI flag overrides on top.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use coachdeck_core::BridgeConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Shape of `config.toml`. Everything is optional; flags and env win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Bridge daemon URL, e.g. `http://coach.local:8080`.
    pub daemon: Option<String>,
    pub reconnect_interval_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub status_poll_interval_secs: Option<u64>,
    pub confirm_timeout_secs: Option<u64>,
    /// View stream used when none is given on the command line.
    pub default_view: Option<String>,
}

/// Default config file location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    directories::ProjectDirs::from("", "", "coachdeck").map_or_else(
        || PathBuf::from("coachdeck.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Load the config file (if any) with `COACHDECK_*` env overrides.
pub fn load_file_config(path: &Path) -> Result<FileConfig, CliError> {
    let config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("COACHDECK_"))
        .extract()?;
    Ok(config)
}

/// Build the bridge configuration from the loaded file and flags.
pub fn resolve_bridge_config(
    global: &GlobalOpts,
    file: &FileConfig,
    path: &Path,
) -> Result<BridgeConfig, CliError> {
    let url_str = global
        .daemon
        .as_deref()
        .or(file.daemon.as_deref())
        .ok_or_else(|| CliError::NoDaemon {
            path: path.display().to_string(),
        })?;
    let daemon_url: Url = url_str.parse().map_err(|_| CliError::Validation {
        field: "daemon".into(),
        reason: format!("invalid URL: {url_str}"),
    })?;

    let mut config = BridgeConfig::new(daemon_url);
    if let Some(value) = file.reconnect_interval_secs {
        config.reconnect_interval_secs = value;
    }
    if let Some(value) = file.max_retries {
        config.max_retries = Some(value);
    }
    if let Some(value) = file.status_poll_interval_secs {
        config.status_poll_interval_secs = value;
    }
    if let Some(value) = file.confirm_timeout_secs {
        config.confirm_timeout_secs = value;
    }
    config.request_timeout_secs = global.timeout;

    Ok(config)
}
