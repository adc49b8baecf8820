//! Security event logging for audit trails.
//!
//! Structured events for authentication, host keys, SFTP channels and
//! uploads. Everything is logged with `target: "security"` so it can be
//! filtered on its own:
//!
//! ```bash
//! RUST_LOG=security=info sshdeck
//! ```

use tracing::{info, warn};

/// Log an SSH authentication attempt.
pub fn log_auth_attempt(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_attempt",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication attempt"
    );
}

/// Log a successful SSH authentication.
pub fn log_auth_success(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_success",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication succeeded"
    );
}

/// Log a failed SSH authentication attempt.
pub fn log_auth_failure(host: &str, port: u16, username: &str, method: &str, reason: &str) {
    warn!(
        target: "security",
        event = "auth_failure",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        reason = %reason,
        "SSH authentication failed"
    );
}

/// Log the host key presented by a server. Keys are accepted without a
/// known_hosts check, so the fingerprint is the audit record.
pub fn log_host_key_seen(host: &str, port: u16, fingerprint: &str) {
    info!(
        target: "security",
        event = "host_key_seen",
        host = %host,
        port = port,
        fingerprint = %fingerprint,
        "Server host key accepted"
    );
}

pub fn log_sftp_channel_opened(session_id: &str) {
    info!(
        target: "security",
        event = "sftp_channel",
        session_id = %session_id,
        "SFTP channel opened"
    );
}

pub fn log_upload_started(session_id: &str, transfer_id: &str, remote_path: &str, size: u64) {
    info!(
        target: "security",
        event = "upload_started",
        session_id = %session_id,
        transfer_id = %transfer_id,
        remote_path = %remote_path,
        size = size,
        "Upload started"
    );
}

pub fn log_upload_completed(session_id: &str, transfer_id: &str, remote_path: &str, size: u64) {
    info!(
        target: "security",
        event = "upload_completed",
        session_id = %session_id,
        transfer_id = %transfer_id,
        remote_path = %remote_path,
        size = size,
        "Upload completed"
    );
}

pub fn log_upload_cancelled(session_id: &str, transfer_id: &str) {
    info!(
        target: "security",
        event = "upload_cancelled",
        session_id = %session_id,
        transfer_id = %transfer_id,
        "Upload cancelled"
    );
}

/// Log the end of a session, with the reason when it failed.
pub fn log_session_closed(session_id: &str, host: &str, error: Option<&str>) {
    match error {
        Some(reason) => warn!(
            target: "security",
            event = "session_lost",
            session_id = %session_id,
            host = %host,
            reason = %reason,
            "SSH session lost"
        ),
        None => info!(
            target: "security",
            event = "session_closed",
            session_id = %session_id,
            host = %host,
            "SSH session closed"
        ),
    }
}
