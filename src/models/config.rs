use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::coordinator::RestartPolicy;
use crate::agent::registry::RegistrySettings;
use crate::models::agent::DirectoryAgent;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the REST API binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port for the REST API server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the agent directory server
    #[serde(default)]
    pub directory_url: Option<String>,

    /// Agents that are always registered, directory or not
    #[serde(default)]
    pub static_agents: Vec<DirectoryAgent>,

    #[serde(default = "default_roster_poll_secs")]
    pub roster_poll_secs: u64,

    #[serde(default = "default_focused_poll_secs")]
    pub focused_poll_secs: u64,

    #[serde(default = "default_directory_refresh_secs")]
    pub directory_refresh_secs: u64,

    /// Timeout for a single request to an agent or the directory
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a filter restart waits for the agent to release its interface
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,

    #[serde(default = "default_release_poll_ms")]
    pub release_poll_ms: u64,

    /// Preset file; presets are kept in memory only when unset
    #[serde(default)]
    pub presets_path: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_roster_poll_secs() -> u64 {
    10
}

fn default_focused_poll_secs() -> u64 {
    3
}

fn default_directory_refresh_secs() -> u64 {
    10
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_release_timeout_ms() -> u64 {
    5000
}

fn default_release_poll_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            directory_url: None,
            static_agents: Vec::new(),
            roster_poll_secs: default_roster_poll_secs(),
            focused_poll_secs: default_focused_poll_secs(),
            directory_refresh_secs: default_directory_refresh_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            release_timeout_ms: default_release_timeout_ms(),
            release_poll_ms: default_release_poll_ms(),
            presets_path: None,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_secs.max(1))
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            roster_interval: Duration::from_secs(self.roster_poll_secs.max(1)),
            focused_interval: Duration::from_secs(self.focused_poll_secs.max(1)),
            restart: RestartPolicy {
                release_timeout: Duration::from_millis(self.release_timeout_ms),
                poll_interval: Duration::from_millis(self.release_poll_ms.max(1)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_use_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.roster_poll_secs, 10);
        assert_eq!(config.focused_poll_secs, 3);
        assert_eq!(config.release_poll_ms, 250);
        assert!(config.directory_url.is_none());
    }

    #[test]
    fn loads_static_agents_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "port": 8088,
                "directory_url": "http://directory:9000",
                "static_agents": [{{"name": "bench", "url": "http://10.0.0.9:8090"}}]
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.static_agents.len(), 1);
        assert_eq!(config.static_agents[0].agent_id(), "bench");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn registry_settings_follow_config() {
        let config = AppConfig {
            focused_poll_secs: 2,
            release_timeout_ms: 1500,
            ..Default::default()
        };
        let settings = config.registry_settings();
        assert_eq!(settings.focused_interval, Duration::from_secs(2));
        assert_eq!(settings.restart.release_timeout, Duration::from_millis(1500));
    }
}
