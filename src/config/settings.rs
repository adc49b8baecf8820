use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Application-wide settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub ssh: SshDefaults,
    #[serde(default)]
    pub sftp: SftpDefaults,
    #[serde(default)]
    pub events: EventDefaults,
}

impl AppConfig {
    /// Load from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::paths::settings_file().ok_or_else(|| ConfigError::ReadFile {
            path: std::path::PathBuf::from("settings.toml"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine settings file path",
            ),
        })?;

        if !path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;

        let path = super::paths::settings_file().ok_or_else(|| ConfigError::WriteFile {
            path: std::path::PathBuf::from("settings.toml"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine settings file path",
            ),
        })?;

        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        super::write_atomic(path, &content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_keepalive() -> u64 {
    30
}

fn default_keepalive_max() -> usize {
    3
}

fn default_cooldown_ms() -> u64 {
    1000
}

fn default_exec_timeout() -> u64 {
    10
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshDefaults {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Zero disables keepalive probes
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,
    #[serde(default = "default_cooldown_ms")]
    pub connect_cooldown_ms: u64,
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: default_keepalive(),
            keepalive_max: default_keepalive_max(),
            connect_cooldown_ms: default_cooldown_ms(),
            exec_timeout_secs: default_exec_timeout(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl SshDefaults {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        // Treat 0 as "no keepalive" to avoid immediate timeout
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn connect_cooldown(&self) -> Duration {
        Duration::from_millis(self.connect_cooldown_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

fn default_chunk_size() -> usize {
    32 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SftpDefaults {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SftpDefaults {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// What happens to an event whose session has no live subscriber
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    #[default]
    Drop,
    DefaultSubscriber,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EventDefaults {
    #[serde(default)]
    pub fallback: FallbackMode,
}
