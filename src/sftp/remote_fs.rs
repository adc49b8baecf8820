//! Remote filesystem operations used by listing and upload.
//!
//! [`RemoteFs`] is the seam between the upload pipeline and the SFTP
//! protocol. [`SftpFs`] implements it over a russh-sftp session opened on an
//! existing SSH connection.

use std::future::Future;

use chrono::DateTime;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::client::error::Error as SftpClientError;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use tokio::io::AsyncWrite;

use super::types::{RemoteAttrs, RemoteEntry};

/// SFTP status codes the upload path distinguishes
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH_FX_PERMISSION_DENIED: u32 = 3;
pub const SSH_FX_FAILURE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    NoSuchFile,
    PermissionDenied,
    /// Generic failure. Servers report "already exists" this way.
    Failure,
    Other,
}

/// Error from a remote filesystem call, keeping the protocol code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFsError {
    pub kind: RemoteErrorKind,
    pub code: Option<u32>,
    pub message: String,
}

impl RemoteFsError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        let code = match kind {
            RemoteErrorKind::NoSuchFile => Some(SSH_FX_NO_SUCH_FILE),
            RemoteErrorKind::PermissionDenied => Some(SSH_FX_PERMISSION_DENIED),
            RemoteErrorKind::Failure => Some(SSH_FX_FAILURE),
            RemoteErrorKind::Other => None,
        };
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == RemoteErrorKind::PermissionDenied
            || self.message.to_lowercase().contains("permission denied")
    }
}

impl std::fmt::Display for RemoteFsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteFsError {}

impl From<SftpClientError> for RemoteFsError {
    fn from(err: SftpClientError) -> Self {
        match &err {
            SftpClientError::Status(status) => {
                let kind = match status.status_code {
                    StatusCode::NoSuchFile => RemoteErrorKind::NoSuchFile,
                    StatusCode::PermissionDenied => RemoteErrorKind::PermissionDenied,
                    StatusCode::Failure => RemoteErrorKind::Failure,
                    _ => RemoteErrorKind::Other,
                };
                let message = if status.error_message.is_empty() {
                    err.to_string()
                } else {
                    status.error_message.clone()
                };
                RemoteFsError::new(kind, message)
            }
            _ => RemoteFsError::new(RemoteErrorKind::Other, err.to_string()),
        }
    }
}

/// Remote filesystem operations over one SFTP channel
pub trait RemoteFs: Send + Sync {
    type Writer: AsyncWrite + Unpin + Send;

    fn stat(&self, path: &str) -> impl Future<Output = Result<RemoteAttrs, RemoteFsError>> + Send;

    fn mkdir(&self, path: &str) -> impl Future<Output = Result<(), RemoteFsError>> + Send;

    fn read_dir(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, RemoteFsError>> + Send;

    /// Open `path` for writing, creating or truncating it
    fn create(&self, path: &str)
    -> impl Future<Output = Result<Self::Writer, RemoteFsError>> + Send;
}

/// [`RemoteFs`] backed by a russh-sftp session
pub struct SftpFs {
    sftp: RusshSftpSession,
}

impl std::fmt::Debug for SftpFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFs").finish_non_exhaustive()
    }
}

impl SftpFs {
    pub fn new(sftp: RusshSftpSession) -> Self {
        Self { sftp }
    }
}

impl RemoteFs for SftpFs {
    type Writer = russh_sftp::client::fs::File;

    async fn stat(&self, path: &str) -> Result<RemoteAttrs, RemoteFsError> {
        let metadata = self.sftp.metadata(path.to_string()).await?;
        Ok(RemoteAttrs {
            size: metadata.size.unwrap_or(0),
            mtime: metadata.mtime,
            permissions: metadata.permissions,
            is_directory: metadata.is_dir(),
        })
    }

    async fn mkdir(&self, path: &str) -> Result<(), RemoteFsError> {
        self.sftp.create_dir(path.to_string()).await?;
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteFsError> {
        let read_dir = self.sftp.read_dir(path.to_string()).await?;

        let entries = read_dir
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| {
                let filename = entry.file_name();
                let metadata = entry.metadata();
                let attrs = RemoteAttrs {
                    size: metadata.size.unwrap_or(0),
                    mtime: metadata.mtime,
                    permissions: metadata.permissions,
                    is_directory: metadata.is_dir(),
                };
                RemoteEntry {
                    longname: format_longname(&filename, &attrs),
                    filename,
                    size: attrs.size,
                    mtime: attrs.mtime,
                    is_directory: attrs.is_directory,
                }
            })
            .collect();

        Ok(entries)
    }

    async fn create(&self, path: &str) -> Result<Self::Writer, RemoteFsError> {
        let file = self
            .sftp
            .open_with_flags(
                path.to_string(),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await?;
        Ok(file)
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// `ls -l` style line built from attributes
pub fn format_longname(name: &str, attrs: &RemoteAttrs) -> String {
    let mode = attrs.permissions.unwrap_or(0);
    let kind = if attrs.is_directory {
        'd'
    } else if mode & S_IFMT == S_IFLNK {
        'l'
    } else {
        '-'
    };

    let mut perms = String::with_capacity(10);
    perms.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    let modified = attrs
        .mtime
        .and_then(|mtime| DateTime::from_timestamp(i64::from(mtime), 0))
        .map(|dt| dt.format("%b %e %H:%M").to_string())
        .unwrap_or_else(|| "            ".to_string());

    format!("{} {:>10} {} {}", perms, attrs.size, modified, name)
}
