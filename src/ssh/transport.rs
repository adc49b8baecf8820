//! Contracts between the session registry and an SSH implementation.
//!
//! [`Connector`] produces authenticated [`Transport`]s. A transport opens
//! the interactive shell, runs one-off commands, and opens SFTP channels.
//! The russh implementation lives in [`super::client`].

use std::future::Future;

use tokio::sync::mpsc;

use crate::config::{SessionIdentity, SshDefaults};
use crate::error::{SftpError, SshError};
use crate::sftp::RemoteFs;

use super::auth::ResolvedAuth;

/// Pseudo-terminal profile requested for the interactive shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub canonical: bool,
    pub echo: bool,
    pub signals: bool,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            canonical: false,
            echo: true,
            signals: true,
        }
    }
}

impl PtyConfig {
    pub fn from_defaults(defaults: &SshDefaults) -> Self {
        Self {
            term: defaults.term.clone(),
            cols: defaults.cols,
            rows: defaults.rows,
            ..Self::default()
        }
    }
}

/// Requests into a running shell channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Data(Vec<u8>),
    WindowChange { cols: u32, rows: u32 },
    Close,
}

/// What a running shell channel reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutput {
    Data(Vec<u8>),
    /// Remote close, EOF, or a requested close
    Closed,
    /// Stream or transport failure
    Failed(String),
}

/// Both ends of an open shell channel
#[derive(Debug)]
pub struct ShellIo {
    pub commands: mpsc::Sender<ShellCommand>,
    pub output: mpsc::Receiver<ShellOutput>,
}

/// Captured result of a one-off command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
    /// Set when the channel failed after the command started
    pub stream_error: Option<String>,
}

/// One authenticated SSH connection
pub trait Transport: Send + Sync + 'static {
    type Fs: RemoteFs + 'static;

    /// Open the interactive shell with the given pty profile
    fn open_shell(&self, pty: &PtyConfig)
    -> impl Future<Output = Result<ShellIo, SshError>> + Send;

    /// Run `command` on a pty-backed exec channel, separate from the shell
    fn exec_with_pty(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<ExecOutput, SshError>> + Send;

    /// Open a fresh SFTP channel
    fn open_sftp(&self) -> impl Future<Output = Result<Self::Fs, SftpError>> + Send;

    /// Whether the underlying connection still accepts writes
    fn is_writable(&self) -> bool;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Establishes authenticated transports
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(
        &self,
        identity: &SessionIdentity,
        auth: ResolvedAuth,
    ) -> impl Future<Output = Result<Self::Transport, SshError>> + Send;
}
