//! Saved sessions and the identity used to dedupe live connections.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, SshError};

fn default_port() -> u16 {
    22
}

/// Authentication type for an SSH connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Password,
    PrivateKey,
}

impl AuthType {
    pub fn method_name(&self) -> &'static str {
        match self {
            AuthType::Password => "password",
            AuthType::PrivateKey => "publickey",
        }
    }
}

/// Connection target. Host comparison ignores case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
}

impl SessionIdentity {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_type,
        }
    }

    /// `host:port` for logs and error messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for SessionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.username == other.username
            && self.auth_type == other.auth_type
    }
}

impl Eq for SessionIdentity {}

impl Hash for SessionIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.to_ascii_lowercase().hash(state);
        self.port.hash(state);
        self.username.hash(state);
        self.auth_type.hash(state);
    }
}

/// Last known status of a saved session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connected,
    #[default]
    Disconnected,
    Error,
}

/// Credential reference kept on disk. Secrets are supplied at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoredCredential {
    Password,
    PrivateKey {
        path: PathBuf,
        #[serde(default)]
        has_passphrase: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    #[serde(flatten)]
    pub identity: SessionIdentity,
    pub credential: StoredCredential,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Everything `connect` needs for one session
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_type: AuthType,
    pub password: Option<SecretString>,
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<SecretString>,
}

impl ConnectConfig {
    pub fn password(host: impl Into<String>, username: impl Into<String>, password: &str) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            auth_type: AuthType::Password,
            password: Some(SecretString::from(password.to_string())),
            private_key_path: None,
            passphrase: None,
        }
    }

    pub fn private_key(
        host: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<&str>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            auth_type: AuthType::PrivateKey,
            password: None,
            private_key_path: Some(key_path.into()),
            passphrase: passphrase.map(|p| SecretString::from(p.to_string())),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(self.host.clone(), self.port, self.username.clone(), self.auth_type)
    }

    /// Structural checks that need no I/O
    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::InvalidConfig("host is required".to_string()));
        }
        if self.port == 0 {
            return Err(SshError::InvalidConfig("port must be 1-65535".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::InvalidConfig("username is required".to_string()));
        }
        Ok(())
    }
}

/// Durable session storage the registry reports status changes to
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<SessionRecord>;
    fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), ConfigError>;
}

/// Saved sessions, stored in sessions.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionsConfig {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

impl SessionsConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading sessions from: {:?}", path);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        super::write_atomic(path, &content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn find(&self, id: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}

/// TOML-backed store. Every mutation is written through to disk.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    config: Mutex<SessionsConfig>,
}

impl FileSessionStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = SessionsConfig::load_from(&path)?;
        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    /// Open the store in the user config directory
    pub fn open_default() -> Result<Self, ConfigError> {
        super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;
        let path = super::paths::sessions_file().ok_or_else(|| ConfigError::ReadFile {
            path: PathBuf::from("sessions.toml"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine sessions file path",
            ),
        })?;
        Self::open(path)
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        self.config.lock().sessions.clone()
    }

    /// Save a new session and assign its id
    pub fn add(
        &self,
        identity: SessionIdentity,
        credential: StoredCredential,
        display_name: Option<String>,
    ) -> Result<SessionRecord, ConfigError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            identity,
            credential,
            display_name,
            status: SessionStatus::Disconnected,
            created_at: now,
            updated_at: now,
        };

        let mut config = self.config.lock();
        config.sessions.push(record.clone());
        config.save_to(&self.path)?;
        Ok(record)
    }

    pub fn update(&self, record: SessionRecord) -> Result<(), ConfigError> {
        self.mutate(&record.id.clone(), move |existing| {
            *existing = SessionRecord {
                updated_at: Utc::now(),
                ..record
            };
        })
    }

    pub fn rename(&self, id: &str, display_name: Option<String>) -> Result<(), ConfigError> {
        self.mutate(id, |record| {
            record.display_name = display_name;
            record.updated_at = Utc::now();
        })
    }

    pub fn remove(&self, id: &str) -> Result<(), ConfigError> {
        let mut config = self.config.lock();
        let before = config.sessions.len();
        config.sessions.retain(|s| s.id != id);
        if config.sessions.len() == before {
            return Err(ConfigError::SessionNotFound(id.to_string()));
        }
        config.save_to(&self.path)
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut SessionRecord)) -> Result<(), ConfigError> {
        let mut config = self.config.lock();
        let record = config
            .find_mut(id)
            .ok_or_else(|| ConfigError::SessionNotFound(id.to_string()))?;
        f(record);
        config.save_to(&self.path)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, id: &str) -> Option<SessionRecord> {
        self.config.lock().find(id).cloned()
    }

    fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), ConfigError> {
        self.mutate(id, |record| {
            record.status = status;
            record.updated_at = Utc::now();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity(host: &str, auth_type: AuthType) -> SessionIdentity {
        SessionIdentity::new(host, 22, "deploy", auth_type)
    }

    #[test]
    fn identity_host_comparison_ignores_case() {
        let a = identity("Build.Example.COM", AuthType::Password);
        let b = identity("build.example.com", AuthType::Password);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn identity_differs_by_auth_type() {
        let a = identity("build.example.com", AuthType::Password);
        let b = identity("build.example.com", AuthType::PrivateKey);
        assert_ne!(a, b);
    }

    #[test]
    fn identity_differs_by_port_and_username() {
        let base = identity("host", AuthType::Password);
        let mut other_port = base.clone();
        other_port.port = 2222;
        let mut other_user = base.clone();
        other_user.username = "root".to_string();

        assert_ne!(base, other_port);
        assert_ne!(base, other_user);
    }

    #[test]
    fn connect_config_validation() {
        assert!(ConnectConfig::password("host", "user", "pw").validate().is_ok());
        assert!(matches!(
            ConnectConfig::password("  ", "user", "pw").validate(),
            Err(SshError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectConfig::password("host", "user", "pw").with_port(0).validate(),
            Err(SshError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectConfig::password("host", "", "pw").validate(),
            Err(SshError::InvalidConfig(_))
        ));
    }

    #[test]
    fn record_port_defaults_to_22() {
        let record: SessionRecord = toml::from_str(
            r#"
            id = "abc"
            host = "example.com"
            username = "deploy"
            auth_type = "password"
            credential = { type = "password" }
            "#,
        )
        .unwrap();
        assert_eq!(record.identity.port, 22);
        assert_eq!(record.status, SessionStatus::Disconnected);
    }

    #[test]
    fn file_store_persists_status_and_names() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.toml");

        let store = FileSessionStore::open(&path).unwrap();
        let record = store
            .add(
                identity("example.com", AuthType::PrivateKey),
                StoredCredential::PrivateKey {
                    path: PathBuf::from("~/.ssh/id_ed25519"),
                    has_passphrase: false,
                },
                None,
            )
            .unwrap();

        store.update_status(&record.id, SessionStatus::Connected).unwrap();
        store.rename(&record.id, Some("build box".into())).unwrap();

        let reopened = FileSessionStore::open(&path).unwrap();
        let saved = reopened.get(&record.id).unwrap();
        assert_eq!(saved.status, SessionStatus::Connected);
        assert_eq!(saved.display_name.as_deref(), Some("build box"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("password ="));
    }

    #[test]
    fn file_store_reports_unknown_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(tmp.path().join("sessions.toml")).unwrap();

        assert!(matches!(
            store.update_status("missing", SessionStatus::Error),
            Err(ConfigError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.remove("missing"),
            Err(ConfigError::SessionNotFound(_))
        ));
    }

    #[test]
    fn file_store_remove_drops_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(tmp.path().join("sessions.toml")).unwrap();
        let record = store
            .add(identity("a", AuthType::Password), StoredCredential::Password, None)
            .unwrap();

        store.remove(&record.id).unwrap();
        assert!(store.list().is_empty());
    }
}
