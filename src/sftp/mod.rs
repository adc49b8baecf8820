//! SFTP: remote filesystem access, directory listing, and cancellable uploads

pub mod path;
pub mod remote_fs;
pub mod transfer;
pub mod types;
pub mod upload;

pub use remote_fs::{RemoteErrorKind, RemoteFs, RemoteFsError, SftpFs};
pub use transfer::{TransferGuard, TransferRegistry, TransferTask};
pub use types::{
    RemoteAttrs, RemoteEntry, UploadDetails, UploadOutcome, UploadProgress, UploadRequest,
    UploadStatus,
};
pub use upload::{UploadPlan, ensure_remote_dir, run_upload};
