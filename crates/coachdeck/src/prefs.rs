//! Persisted UI preferences.
//!
//! Remembers the operator's last view filter and panel layout across
//! invocations. Read at startup, written on interaction — and never
//! authoritative for entity state, which is always re-derived from the
//! daemon.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CliError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiPrefs {
    /// Last view stream the operator selected.
    #[serde(default)]
    pub view_filter: Option<String>,

    /// Panel ordering for the dashboard layout.
    #[serde(default)]
    pub panel_layout: Vec<String>,

    #[serde(default)]
    pub sidebar_collapsed: bool,
}

impl UiPrefs {
    /// Default preferences file location.
    pub fn path() -> PathBuf {
        directories::ProjectDirs::from("", "", "coachdeck").map_or_else(
            || PathBuf::from(".coachdeck-prefs.toml"),
            |dirs| dirs.data_dir().join("prefs.toml"),
        )
    }

    /// Load preferences, falling back to defaults on a missing or
    /// unreadable file. Prefs are a convenience, never worth failing a
    /// command over.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                tracing::debug!(error = %e, path = %path.display(), "ignoring corrupt prefs file");
                Self::default()
            }),
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "no prefs file, using defaults");
                Self::default()
            }
        }
    }

    /// Persist preferences, creating parent directories as needed.
    pub fn store(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).expect("prefs serialization should not fail");
        std::fs::write(path, raw)?;
        Ok(())
    }
}
