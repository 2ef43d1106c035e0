//! Configuration loading for the liveness protocol.
//!
//! Handles paths and persistence for:
//! - Runtime tuning (`~/.hfw/liveness.toml`)
//! - The shared session store directory (`~/.hfw/sessions`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HfwError, Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_DIALOG_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STALE_TAB_SECS: u64 = 30;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Returns the HFW state directory (~/.hfw).
pub fn get_hfw_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".hfw"))
}

/// Returns the path to the liveness configuration file.
pub fn get_config_path() -> Option<PathBuf> {
    get_hfw_dir().map(|d| d.join("liveness.toml"))
}

/// Returns the default directory holding one shared file per session scope.
pub fn get_default_store_dir() -> Option<PathBuf> {
    get_hfw_dir().map(|d| d.join("sessions"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Period of the `check_for_show_dialog` poll and of driver pumps.
    pub poll_interval_ms: u64,
    /// Countdown shown by the dialog before it resolves on its own.
    pub dialog_timeout_secs: u64,
    /// Tabs without a heartbeat for this long are pruned. 0 disables pruning.
    pub stale_tab_secs: u64,
    /// How long a file-backed store waits for the session lock.
    pub lock_timeout_ms: u64,
    pub store_dir: Option<PathBuf>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            dialog_timeout_secs: DEFAULT_DIALOG_TIMEOUT_SECS,
            stale_tab_secs: DEFAULT_STALE_TAB_SECS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            store_dir: None,
        }
    }
}

impl LivenessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn dialog_timeout(&self) -> Duration {
        Duration::from_secs(self.dialog_timeout_secs)
    }

    pub fn stale_tab_after(&self) -> Option<Duration> {
        (self.stale_tab_secs > 0).then(|| Duration::from_secs(self.stale_tab_secs))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn resolve_store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_default_store_dir().ok_or(HfwError::HomeDirNotFound),
        }
    }
}

/// Loads the liveness configuration, returning defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<LivenessConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path().ok_or(HfwError::HomeDirNotFound)?,
    };

    if !config_path.exists() {
        return Ok(LivenessConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| HfwError::io("Failed to read liveness config", err))?;
    toml::from_str::<LivenessConfig>(&content).map_err(|err| HfwError::Config {
        path: config_path,
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, LivenessConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.dialog_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn load_config_parses_partial_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("liveness.toml");
        fs_err::write(
            &path,
            r#"
dialog_timeout_secs = 15
stale_tab_secs = 0
store_dir = "/tmp/hfw-sessions"
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.dialog_timeout_secs, 15);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.stale_tab_after(), None);
        assert_eq!(
            config.resolve_store_dir().expect("store dir"),
            PathBuf::from("/tmp/hfw-sessions")
        );
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("liveness.toml");
        fs_err::write(&path, "dialog_timeout_secs = \"soon\"").expect("write config");

        let err = load_config(Some(&path)).expect_err("malformed config");
        assert!(matches!(err, HfwError::Config { .. }));
    }
}
