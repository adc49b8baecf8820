//! Single-file upload over a [`RemoteFs`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use russh_sftp::client::error::Error as SftpClientError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ErrorDetail, SftpError};

use super::path;
use super::remote_fs::{
    RemoteErrorKind, RemoteFs, RemoteFsError, SSH_FX_FAILURE, SSH_FX_NO_SUCH_FILE,
    SSH_FX_PERMISSION_DENIED,
};
use super::transfer::{self, TransferTask};
use super::types::{UploadDetails, UploadOutcome, UploadProgress, UploadStatus, percent};

/// A validated upload: the local file exists and the remote target names a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub file_name: String,
    pub file_size: u64,
}

impl UploadPlan {
    /// Check the local file and resolve the remote target.
    pub async fn prepare(local_path: &Path, remote_path: &str) -> Result<Self, SftpError> {
        let metadata = match tokio::fs::metadata(local_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SftpError::LocalFileMissing(local_path.to_path_buf()));
            }
            Err(e) => {
                return Err(SftpError::LocalRead {
                    path: local_path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };

        if !metadata.is_file() {
            return Err(SftpError::LocalPathNotFile(local_path.to_path_buf()));
        }

        let remote_path = path::resolve_target(remote_path, local_path)?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path::file_name(&remote_path).to_string());

        Ok(Self {
            local_path: local_path.to_path_buf(),
            remote_path,
            file_name,
            file_size: metadata.len(),
        })
    }

    fn details(&self, transfer_id: &str) -> UploadDetails {
        UploadDetails {
            transfer_id: transfer_id.to_string(),
            local_path: self.local_path.clone(),
            remote_path: self.remote_path.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
        }
    }
}

/// Make sure `dir` and all of its ancestors exist on the remote side.
pub fn ensure_remote_dir<'a, F: RemoteFs>(
    fs: &'a F,
    dir: &'a str,
) -> Pin<Box<dyn Future<Output = Result<(), SftpError>> + Send + 'a>> {
    Box::pin(async move {
        if path::is_root(dir) {
            return Ok(());
        }

        match fs.stat(dir).await {
            Ok(attrs) if attrs.is_directory => return Ok(()),
            Ok(_) => return Err(SftpError::RemoteNotADirectory(dir.to_string())),
            Err(e) if e.kind == RemoteErrorKind::NoSuchFile => {}
            Err(e) if e.is_permission_denied() => {
                return Err(SftpError::RemoteDirectoryPermissionDenied {
                    path: dir.to_string(),
                    message: e.message,
                });
            }
            Err(e) => {
                return Err(SftpError::RemoteDirectoryCheckFailed {
                    path: dir.to_string(),
                    message: e.message,
                });
            }
        }

        if let Some(parent) = path::parent(dir) {
            ensure_remote_dir(fs, parent).await?;
        }

        match fs.mkdir(dir).await {
            Ok(()) => {
                tracing::debug!("Created remote directory {}", dir);
                Ok(())
            }
            Err(e) if e.is_permission_denied() => Err(SftpError::RemoteDirectoryPermissionDenied {
                path: dir.to_string(),
                message: e.message,
            }),
            Err(e) if e.kind == RemoteErrorKind::Failure => {
                // Another creator may have won the race
                match fs.stat(dir).await {
                    Ok(attrs) if attrs.is_directory => Ok(()),
                    _ => Err(SftpError::RemoteDirectoryCreateFailed {
                        path: dir.to_string(),
                        message: e.message,
                    }),
                }
            }
            Err(e) => Err(SftpError::RemoteDirectoryCreateFailed {
                path: dir.to_string(),
                message: e.message,
            }),
        }
    })
}

/// Turn a remote write failure into a readable error, keeping the raw code
pub fn classify_write_error(code: Option<u32>, message: &str, remote_path: &str) -> SftpError {
    let lowered = message.to_lowercase();
    let readable = if lowered.contains("permission denied") {
        format!(
            "Permission denied writing {}. Check that the remote user can write to the target directory.",
            remote_path
        )
    } else if code == Some(SSH_FX_FAILURE) || lowered.contains("failure") {
        format!(
            "Remote write to {} failed. The file may already exist and be read-only, \
             the disk or quota may be full, or a security policy such as SELinux may block it.",
            remote_path
        )
    } else {
        format!("Remote write to {} failed: {}", remote_path, message)
    };

    SftpError::RemoteWrite {
        message: readable,
        detail: ErrorDetail {
            code,
            message: message.to_string(),
            kind: "WriteStreamError".to_string(),
        },
    }
}

fn classify_fs_error(err: &RemoteFsError, remote_path: &str) -> SftpError {
    let message = if err.kind == RemoteErrorKind::PermissionDenied
        && !err.message.to_lowercase().contains("permission denied")
    {
        format!("Permission denied: {}", err.message)
    } else {
        err.message.clone()
    };
    classify_write_error(err.code, &message, remote_path)
}

/// Recover the SFTP status code behind a stream error.
///
/// russh-sftp flattens write acknowledgements into `io::Error`s carrying
/// only the server's status text, so the text is matched against the
/// standard status messages when no typed error is attached.
fn status_code_of(err: &std::io::Error) -> Option<u32> {
    if let Some(inner) = err.get_ref() {
        if let Some(fs_err) = inner.downcast_ref::<RemoteFsError>() {
            return fs_err.code;
        }
        if let Some(sftp_err) = inner.downcast_ref::<SftpClientError>() {
            return RemoteFsError::from(sftp_err.clone()).code;
        }
    }

    let message = err.to_string().to_lowercase();
    [
        ("no such file", SSH_FX_NO_SUCH_FILE),
        ("permission denied", SSH_FX_PERMISSION_DENIED),
        ("failure", SSH_FX_FAILURE),
    ]
    .into_iter()
    .find(|(text, _)| message.starts_with(text))
    .map(|(_, code)| code)
}

fn classify_io_error(err: &std::io::Error, remote_path: &str) -> SftpError {
    let code = status_code_of(err);
    let denied = err.kind() == std::io::ErrorKind::PermissionDenied
        || code == Some(SSH_FX_PERMISSION_DENIED);
    let message = if denied && !err.to_string().to_lowercase().contains("permission denied")
    {
        format!("Permission denied: {}", err)
    } else {
        err.to_string()
    };
    classify_write_error(code, &message, remote_path)
}

/// Run the upload described by `plan`, reporting progress through `progress`.
///
/// The remote parent directory chain is created first. Progress is
/// reported as `checking_dir`, then `starting`, then one `uploading` per
/// chunk. Cancellation through `task` drops both streams and resolves as
/// [`UploadOutcome::Cancelled`]. The task is settled before returning, so
/// a cancel that was accepted always yields `Cancelled`.
pub async fn run_upload<F, P>(
    fs: &F,
    plan: &UploadPlan,
    task: &TransferTask,
    chunk_size: usize,
    progress: P,
) -> Result<UploadOutcome, SftpError>
where
    F: RemoteFs,
    P: FnMut(UploadProgress),
{
    let result = copy_to_remote(fs, plan, task, chunk_size, progress).await;
    if task.finish() {
        result
    } else {
        Ok(UploadOutcome::Cancelled {
            transfer_id: task.id.clone(),
        })
    }
}

async fn copy_to_remote<F, P>(
    fs: &F,
    plan: &UploadPlan,
    task: &TransferTask,
    chunk_size: usize,
    mut progress: P,
) -> Result<UploadOutcome, SftpError>
where
    F: RemoteFs,
    P: FnMut(UploadProgress),
{
    let cancelled_outcome = || UploadOutcome::Cancelled {
        transfer_id: task.id.clone(),
    };
    let mut report = |status: UploadStatus, sent: u64| {
        progress(UploadProgress {
            session_id: task.session_id.clone(),
            transfer_id: task.id.clone(),
            file_name: plan.file_name.clone(),
            bytes_transferred: sent,
            total_bytes: plan.file_size,
            percent: match status {
                UploadStatus::Uploading => percent(sent, plan.file_size),
                _ => 0,
            },
            status,
        })
    };
    let mut signal = task.cancel_signal();

    report(UploadStatus::CheckingDir, 0);
    if let Some(parent) = path::parent(&plan.remote_path) {
        tokio::select! {
            biased;
            _ = transfer::cancelled(&mut signal) => return Ok(cancelled_outcome()),
            result = ensure_remote_dir(fs, parent) => result?,
        }
    }

    report(UploadStatus::Starting, 0);

    let mut local = tokio::fs::File::open(&plan.local_path)
        .await
        .map_err(|e| SftpError::LocalRead {
            path: plan.local_path.clone(),
            message: e.to_string(),
        })?;

    let mut remote = tokio::select! {
        biased;
        _ = transfer::cancelled(&mut signal) => return Ok(cancelled_outcome()),
        created = fs.create(&plan.remote_path) => {
            created.map_err(|e| classify_fs_error(&e, &plan.remote_path))?
        }
    };

    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = tokio::select! {
            biased;
            _ = transfer::cancelled(&mut signal) => return Ok(cancelled_outcome()),
            read = local.read(&mut buf) => read.map_err(|e| SftpError::LocalRead {
                path: plan.local_path.clone(),
                message: e.to_string(),
            })?,
        };
        if n == 0 {
            break;
        }

        tokio::select! {
            biased;
            _ = transfer::cancelled(&mut signal) => return Ok(cancelled_outcome()),
            written = remote.write_all(&buf[..n]) => {
                written.map_err(|e| classify_io_error(&e, &plan.remote_path))?
            }
        }

        let sent = task.add_bytes(n as u64);
        tracing::debug!(
            "Upload {}: {}/{} bytes",
            task.id,
            sent,
            plan.file_size
        );
        report(UploadStatus::Uploading, sent);
    }

    if plan.file_size == 0 {
        report(UploadStatus::Uploading, 0);
    }

    tokio::select! {
        biased;
        _ = transfer::cancelled(&mut signal) => return Ok(cancelled_outcome()),
        closed = remote.shutdown() => {
            closed.map_err(|e| classify_io_error(&e, &plan.remote_path))?
        }
    }

    Ok(UploadOutcome::Completed(plan.details(&task.id)))
}
