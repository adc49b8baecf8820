use serde::Serialize;

use crate::config::{SessionIdentity, SessionStatus};
use crate::sftp::UploadProgress;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusPayload {
    pub status: SessionStatus,
    pub identity: SessionIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything the core reports to the front-end
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Raw terminal output, forwarded as produced
    Output { session_id: String, data: Vec<u8> },
    StatusChange {
        session_id: String,
        #[serde(flatten)]
        payload: StatusPayload,
    },
    Disconnect { session_id: String },
    UploadProgress(UploadProgress),
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Output { session_id, .. }
            | SessionEvent::StatusChange { session_id, .. }
            | SessionEvent::Disconnect { session_id } => session_id,
            SessionEvent::UploadProgress(progress) => &progress.session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Output { .. } => "output",
            SessionEvent::StatusChange { .. } => "status_change",
            SessionEvent::Disconnect { .. } => "disconnect",
            SessionEvent::UploadProgress(_) => "upload_progress",
        }
    }
}
