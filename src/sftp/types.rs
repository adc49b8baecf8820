//! SFTP types shared by listing and upload

use std::path::PathBuf;

use serde::Serialize;

/// Attributes returned by a remote `stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteAttrs {
    pub size: u64,
    pub mtime: Option<u32>,
    pub permissions: Option<u32>,
    pub is_directory: bool,
}

/// One remote directory entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteEntry {
    pub filename: String,
    pub longname: String,
    pub size: u64,
    pub mtime: Option<u32>,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    CheckingDir,
    Starting,
    Uploading,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadProgress {
    pub session_id: String,
    pub transfer_id: String,
    pub file_name: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percent: u8,
    pub status: UploadStatus,
}

/// Rounded completion percentage. An empty file is complete.
pub fn percent(bytes_transferred: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 100;
    }
    let ratio = bytes_transferred as f64 / total_bytes as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// An upload request as received from the front-end
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub session_id: String,
    /// Asked from the file picker when absent
    pub local_path: Option<PathBuf>,
    pub remote_path: String,
    pub transfer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadDetails {
    pub transfer_id: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Terminal result of an upload that did not fail
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadOutcome {
    Completed(UploadDetails),
    Cancelled { transfer_id: String },
}

impl UploadOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadOutcome::Cancelled { .. })
    }
}
