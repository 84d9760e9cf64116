use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Get the local data directory for trease.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("trease");
    Ok(path)
}

/// How a blocked application is pushed out of the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementStrategy {
    /// Raise the controlling UI on top with the blocked id attached.
    Redirect,
    /// Kill every process named like the blocked id.
    Terminate,
}

/// Daemon settings read from `config.toml` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Foreground sampling cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Trailing window for the most-recently-used fallback.
    pub fallback_window_secs: u64,
    pub strategy: EnforcementStrategy,
    /// Identifiers treated as the home screen / launcher.
    pub home_ids: Vec<String>,
    /// The controlling UI's own identifier, never locked.
    pub self_id: String,
    /// Argv spawned to raise the lock UI. `{target}` is replaced by the blocked id.
    pub redirect_command: Option<Vec<String>>,
    /// Directories scanned for `.desktop` launcher entries.
    pub application_dirs: Vec<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            fallback_window_secs: 10,
            strategy: EnforcementStrategy::Redirect,
            home_ids: vec![
                "gnome-shell".to_string(),
                "plasmashell".to_string(),
                "xfdesktop".to_string(),
                "com.apple.finder".to_string(),
            ],
            self_id: "trease".to_string(),
            redirect_command: None,
            application_dirs: vec![
                PathBuf::from("/usr/share/applications"),
                PathBuf::from("/usr/local/share/applications"),
            ],
        }
    }
}

impl MonitorConfig {
    /// Path of the config file inside the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        Ok(get_data_dir()?.join("config.toml"))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is unreadable or invalid.
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.self_id.trim().is_empty() {
            anyhow::bail!("self_id must not be empty");
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn fallback_window(&self) -> Duration {
        Duration::from_secs(self.fallback_window_secs)
    }

    /// Render as TOML for `trease config show`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(150));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "poll_interval_ms = 100\nstrategy = \"terminate\"\nhome_ids = [\"launcher\"]\n",
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.strategy, EnforcementStrategy::Terminate);
        assert_eq!(config.home_ids, vec!["launcher".to_string()]);
        assert_eq!(config.fallback_window_secs, 10);
        assert_eq!(config.self_id, "trease");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = 0\n").unwrap();
        assert!(MonitorConfig::load(&path).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MonitorConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: MonitorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
