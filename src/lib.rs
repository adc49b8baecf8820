//! sshdeck: SSH/SFTP session manager
//!
//! Keeps one interactive shell per session id, relays its output as
//! events, and runs cancellable SFTP uploads over the same connection.

pub mod config;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod relay;
pub mod security_log;
pub mod sftp;
pub mod ssh;
