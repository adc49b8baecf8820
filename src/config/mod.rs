pub mod paths;
pub mod sessions;
pub mod settings;

use std::io::Write;
use std::path::Path;

pub use sessions::{
    AuthType, ConnectConfig, FileSessionStore, SessionIdentity, SessionRecord, SessionStatus,
    SessionStore, SessionsConfig, StoredCredential,
};
pub use settings::{AppConfig, EventDefaults, FallbackMode, SftpDefaults, SshDefaults};

/// Write a file by writing a sibling temp file and renaming it into place,
/// so a crash never leaves a half-written config behind.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.toml");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!tmp.path().join(".sessions.toml.tmp").exists());
    }
}
