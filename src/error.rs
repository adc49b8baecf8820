use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error class used when reporting failures to the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad or missing credential/config fields, no connection attempted
    Config,
    /// Network, handshake, auth rejection, keepalive loss
    Transport,
    /// Shell or transfer channel allocation
    Channel,
    /// Local read, remote write, remote directory handling
    Io,
}

/// Raw error information kept alongside the readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: Option<u32>,
    pub message: String,
    pub kind: String,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
}

/// SSH connection and shell errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Cannot read key file {path}: {reason}")]
    KeyRead { path: PathBuf, reason: String },

    #[error("Invalid connection config: {0}")]
    InvalidConfig(String),

    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Timeout connecting to {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("No active connection for session {0}")]
    NotConnected(String),

    #[error("russh error: {0}")]
    Russh(String),
}

impl SshError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SshError::MissingCredential(_)
            | SshError::KeyRead { .. }
            | SshError::InvalidConfig(_) => ErrorCategory::Config,
            SshError::ConnectionFailed { .. }
            | SshError::Timeout(_)
            | SshError::AuthenticationFailed(_)
            | SshError::Russh(_) => ErrorCategory::Transport,
            SshError::Channel(_) | SshError::NotConnected(_) => ErrorCategory::Channel,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SshError::MissingCredential(_) => "MISSING_CREDENTIAL",
            SshError::KeyRead { .. } => "KEY_READ",
            SshError::InvalidConfig(_) => "INVALID_CONFIG",
            SshError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            SshError::Timeout(_) => "TIMEOUT",
            SshError::AuthenticationFailed(_) => "AUTH_FAILED",
            SshError::Channel(_) => "CHANNEL",
            SshError::NotConnected(_) => "NOT_CONNECTED",
            SshError::Russh(_) => "TRANSPORT",
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

/// SFTP and upload errors
#[derive(Error, Debug)]
pub enum SftpError {
    #[error("No active connection for session {0}")]
    NotConnected(String),

    #[error("Local file does not exist: {0}")]
    LocalFileMissing(PathBuf),

    #[error("Local path is not a regular file: {0}")]
    LocalPathNotFile(PathBuf),

    #[error("Remote path is a directory, a file name is required: {0}")]
    RemotePathIsDirectory(String),

    #[error("Failed to open SFTP channel: {0}")]
    ChannelOpen(String),

    #[error("Permission denied creating remote directory {path}: {message}")]
    RemoteDirectoryPermissionDenied { path: String, message: String },

    #[error("Failed to create remote directory {path}: {message}")]
    RemoteDirectoryCreateFailed { path: String, message: String },

    #[error("Failed to check remote directory {path}: {message}")]
    RemoteDirectoryCheckFailed { path: String, message: String },

    #[error("Remote path exists but is not a directory: {0}")]
    RemoteNotADirectory(String),

    #[error("Failed to read local file {path}: {message}")]
    LocalRead { path: PathBuf, message: String },

    #[error("{message}")]
    RemoteWrite {
        message: String,
        detail: ErrorDetail,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Transfer {transfer_id} does not belong to session {session_id}")]
    SessionMismatch {
        transfer_id: String,
        session_id: String,
    },

    #[error("Transfer id already in use: {0}")]
    TransferIdInUse(String),

    #[error("No file selected")]
    NoFileSelected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SftpError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SftpError::NotConnected(_) | SftpError::ChannelOpen(_) => ErrorCategory::Channel,
            SftpError::TransferNotFound(_)
            | SftpError::SessionMismatch { .. }
            | SftpError::TransferIdInUse(_)
            | SftpError::NoFileSelected
            | SftpError::InvalidRequest(_) => ErrorCategory::Config,
            _ => ErrorCategory::Io,
        }
    }

    /// Machine-readable code used by the front-end
    pub fn code(&self) -> &'static str {
        match self {
            SftpError::NotConnected(_) => "NOT_CONNECTED",
            SftpError::LocalFileMissing(_) => "LOCAL_FILE_MISSING",
            SftpError::LocalPathNotFile(_) => "LOCAL_PATH_NOT_FILE",
            SftpError::RemotePathIsDirectory(_) => "PATH_IS_DIRECTORY",
            SftpError::ChannelOpen(_) => "CHANNEL_OPEN",
            SftpError::RemoteDirectoryPermissionDenied { .. } => "REMOTE_DIR_PERMISSION_DENIED",
            SftpError::RemoteDirectoryCreateFailed { .. } => "REMOTE_DIR_CREATE_FAILED",
            SftpError::RemoteDirectoryCheckFailed { .. } => "REMOTE_DIR_CHECK_FAILED",
            SftpError::RemoteNotADirectory(_) => "REMOTE_NOT_A_DIRECTORY",
            SftpError::LocalRead { .. } => "LOCAL_READ",
            SftpError::RemoteWrite { .. } => "REMOTE_WRITE",
            SftpError::FileOperation(_) => "FILE_OPERATION",
            SftpError::TransferNotFound(_) => "NOT_FOUND",
            SftpError::SessionMismatch { .. } => "SESSION_MISMATCH",
            SftpError::TransferIdInUse(_) => "TRANSFER_ID_IN_USE",
            SftpError::NoFileSelected => "NO_FILE_SELECTED",
            SftpError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Raw detail for errors that carry one
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            SftpError::RemoteWrite { detail, .. } => Some(detail),
            _ => None,
        }
    }
}
