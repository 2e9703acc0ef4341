//! Runtime session configuration.
//!
//! Loads a `runtime.toml` from an explicit path, or falls back to the defaults
//! embedded from the crate's `config.toml`.
//!
//! # Testing
//!
//! Tests use [`RuntimeConfig::load()`] with explicit paths to temporary
//! directories, or build a [`RuntimeConfig`] directly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{path::Path, time::Duration};

/// Tunables for a live rendering session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Seconds to wait for the live instance to load its bootstrap page.
    ///
    /// `0` means no limit.
    pub startup_timeout_secs: u64,

    /// Ceiling for the stylesheet reload handshake.
    ///
    /// Only bounds responsiveness. A handshake that does not finish in time
    /// leaves its markers to the next refresh.
    pub style_wait_ms: u64,

    /// Ceiling for pending image loads before a screenshot.
    pub image_wait_ms: u64,

    /// Pause between polls while a wait is outstanding.
    pub poll_interval_ms: u64,

    /// Address the resource server binds to.
    pub bind: String,

    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 0,
            style_wait_ms: 500,
            image_wait_ms: 500,
            poll_interval_ms: 10,
            bind: "127.0.0.1:0".to_string(),
            viewport_width: 450,
            viewport_height: 300,
        }
    }
}

impl RuntimeConfig {
    /// Read and deserialize a TOML config file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RuntimeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration with priority: CLI override > discovered path > defaults.
    pub fn load_with_overrides(
        cli_override: Option<&Path>,
        discovered_path: Option<&Path>,
    ) -> Result<Self> {
        if let Some(path) = cli_override {
            return Self::load(path);
        }
        if let Some(path) = discovered_path {
            return Self::load(path);
        }
        Self::load_embedded()
    }

    fn load_embedded() -> Result<Self> {
        let source = include_str!("../config.toml");
        toml::from_str(source).context("Failed to parse embedded config.toml")
    }

    /// `None` when startup may take as long as it needs.
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.startup_timeout_secs != 0).then(|| Duration::from_secs(self.startup_timeout_secs))
    }

    pub fn style_wait(&self) -> Duration {
        Duration::from_millis(self.style_wait_ms)
    }

    pub fn image_wait(&self) -> Duration {
        Duration::from_millis(self.image_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_empty_config() {
        let tmp_dir = tempdir().unwrap();
        let config_path = tmp_dir.path().join("runtime.toml");
        std::fs::write(&config_path, "").unwrap();

        let config = RuntimeConfig::load(&config_path).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn errors_on_invalid_toml() {
        let tmp_dir = tempdir().unwrap();
        let config_path = tmp_dir.path().join("runtime.toml");
        std::fs::write(&config_path, "invalid toml {{{{").unwrap();

        let result = RuntimeConfig::load(&config_path);
        assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    }

    #[test]
    fn errors_on_nonexistent_file() {
        let tmp_dir = tempdir().unwrap();
        let config_path = tmp_dir.path().join("nonexistent.toml");

        let result = RuntimeConfig::load(&config_path);
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let tmp_dir = tempdir().unwrap();
        let config_path = tmp_dir.path().join("runtime.toml");
        std::fs::write(&config_path, "style_wait = 20").unwrap();

        assert!(RuntimeConfig::load(&config_path).is_err());
    }

    #[test]
    fn embedded_matches_default() {
        let config = RuntimeConfig::load_with_overrides(None, None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn cli_override_takes_priority() {
        let tmp_dir = tempdir().unwrap();
        let cli_path = tmp_dir.path().join("cli.toml");
        let discovered_path = tmp_dir.path().join("discovered.toml");
        std::fs::write(&cli_path, "style_wait_ms = 20").unwrap();
        std::fs::write(&discovered_path, "style_wait_ms = 30").unwrap();

        let config =
            RuntimeConfig::load_with_overrides(Some(&cli_path), Some(&discovered_path)).unwrap();
        assert_eq!(config.style_wait_ms, 20);
    }

    #[test]
    fn discovered_path_used_when_no_cli_override() {
        let tmp_dir = tempdir().unwrap();
        let discovered_path = tmp_dir.path().join("discovered.toml");
        std::fs::write(&discovered_path, "image_wait_ms = 30").unwrap();

        let config = RuntimeConfig::load_with_overrides(None, Some(&discovered_path)).unwrap();
        assert_eq!(config.image_wait_ms, 30);
        assert_eq!(config.style_wait_ms, 500);
    }

    #[test]
    fn zero_startup_timeout_is_unbounded() {
        let mut config = RuntimeConfig::default();
        assert_eq!(config.startup_timeout(), None);
        config.startup_timeout_secs = 3;
        assert_eq!(config.startup_timeout(), Some(Duration::from_secs(3)));
    }
}
