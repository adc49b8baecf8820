//! Remote path helpers. Remote paths always use `/`.

use std::path::Path;

use crate::error::SftpError;

/// Resolve the upload destination. A remote path ending in `/` names a
/// directory and gets the local file's base name appended.
pub fn resolve_target(remote_path: &str, local_path: &Path) -> Result<String, SftpError> {
    let mut target = remote_path.to_string();

    if target.ends_with('/') {
        if let Some(name) = local_path.file_name() {
            target.push_str(&name.to_string_lossy());
        }
    }

    if target.ends_with('/') {
        return Err(SftpError::RemotePathIsDirectory(target));
    }

    Ok(target)
}

/// Parent directory of a remote path. `None` for a bare relative name,
/// which lives in the SFTP server's working directory.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Final component of a remote path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether a directory path needs no creation
pub fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/" || path == "."
}
