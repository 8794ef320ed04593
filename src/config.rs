use crate::sites::TargetDescriptor;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub endpoint: String,
    pub chrome_debug_port: u16,
    /// Start a Chrome when nothing listens on `chrome_debug_port`.
    pub launch_chrome: bool,
    pub reconnect_delay_ms: u64,
    pub construction_retry_ms: u64,
    pub heartbeat_secs: u64,
    pub tab_restore_delay_ms: u64,
    pub tab_rescan_secs: u64,
    pub message_poll_ms: u64,
    pub session_save_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Site key -> URL to open instead of the built-in one.
    pub site_urls: BTreeMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8765".to_string(),
            chrome_debug_port: 9222,
            launch_chrome: true,
            reconnect_delay_ms: 3000,
            construction_retry_ms: 5000,
            heartbeat_secs: 30,
            tab_restore_delay_ms: 2000,
            tab_rescan_secs: 5,
            message_poll_ms: 2000,
            session_save_secs: 30,
            data_dir: None,
            site_urls: BTreeMap::new(),
        }
    }
}

impl RelayConfig {
    /// Database and Chrome profile live here.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir().context("Cannot find home directory")?;
                Ok(home.join(".chat-relay"))
            }
        }
    }

    pub fn open_url<'a>(&'a self, site: &'a TargetDescriptor) -> &'a str {
        self.site_urls
            .get(site.key)
            .map(String::as_str)
            .unwrap_or(site.open_url)
    }

    /// Periods drive tokio intervals and must be non-zero. A zero period is
    /// replaced by its default.
    pub fn with_valid_periods(mut self) -> Self {
        let defaults = Self::default();
        let periods = [
            ("heartbeat_secs", &mut self.heartbeat_secs, defaults.heartbeat_secs),
            ("tab_rescan_secs", &mut self.tab_rescan_secs, defaults.tab_rescan_secs),
            ("message_poll_ms", &mut self.message_poll_ms, defaults.message_poll_ms),
            ("session_save_secs", &mut self.session_save_secs, defaults.session_save_secs),
        ];
        for (key, value, default) in periods {
            if *value == 0 {
                warn!("[config] {} must be greater than 0, using {}", key, default);
                *value = default;
            }
        }
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn construction_retry(&self) -> Duration {
        Duration::from_millis(self.construction_retry_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn tab_restore_delay(&self) -> Duration {
        Duration::from_millis(self.tab_restore_delay_ms)
    }

    pub fn tab_rescan(&self) -> Duration {
        Duration::from_secs(self.tab_rescan_secs)
    }

    pub fn message_poll(&self) -> Duration {
        Duration::from_millis(self.message_poll_ms)
    }

    pub fn session_save(&self) -> Duration {
        Duration::from_secs(self.session_save_secs)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Cannot find config directory")?;
    Ok(dir.join("chat-relay").join("config.toml"))
}

/// Read the config file, writing defaults first when it does not exist.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        let config = RelayConfig::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        info!("[config] wrote defaults to {}", path.display());
        return Ok(config);
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: RelayConfig = toml::from_str(&content).unwrap_or_else(|e| {
        warn!(
            "[config] error parsing {}: {}. Using defaults.",
            path.display(),
            e
        );
        RelayConfig::default()
    });
    Ok(config.with_valid_periods())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config, RelayConfig::default());
        assert!(path.exists());
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "endpoint = \"ws://127.0.0.1:9000\"\n\n[site_urls]\ngemini = \"https://gemini.google.com/app/abc\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(config.chrome_debug_port, 9222);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(
            config.open_url(&sites::gemini::descriptor()),
            "https://gemini.google.com/app/abc"
        );
        assert_eq!(config.open_url(&sites::claude::descriptor()), "https://claude.ai/new");
    }

    #[test]
    fn zero_periods_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "heartbeat_secs = 0\ntab_rescan_secs = 0\nmessage_poll_ms = 0\nsession_save_secs = 0\nreconnect_delay_ms = 250\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.tab_rescan(), Duration::from_secs(5));
        assert_eq!(config.message_poll(), Duration::from_secs(2));
        assert_eq!(config.session_save(), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "endpoint = [not toml").unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), RelayConfig::default());
    }
}
