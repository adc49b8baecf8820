//! Interactive shell channel lifecycle.
//!
//! `Created -> Ready -> Closed`, or `Created -> Failed` when the channel
//! cannot be allocated. Any other transition is ignored.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::SshError;

use super::transport::{PtyConfig, ShellCommand, ShellOutput, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Created,
    Ready,
    Closed,
    Failed,
}

impl ShellState {
    fn can_move_to(self, next: ShellState) -> bool {
        matches!(
            (self, next),
            (ShellState::Created, ShellState::Ready)
                | (ShellState::Created, ShellState::Failed)
                | (ShellState::Ready, ShellState::Closed)
        )
    }
}

/// The interactive shell of one session
#[derive(Debug)]
pub struct ShellChannel {
    state: Mutex<ShellState>,
    pty: Mutex<PtyConfig>,
    commands: Option<mpsc::Sender<ShellCommand>>,
}

impl ShellChannel {
    pub fn new(pty: PtyConfig) -> Self {
        Self {
            state: Mutex::new(ShellState::Created),
            pty: Mutex::new(pty),
            commands: None,
        }
    }

    pub fn state(&self) -> ShellState {
        *self.state.lock()
    }

    pub fn pty(&self) -> PtyConfig {
        self.pty.lock().clone()
    }

    fn transition(&self, next: ShellState) -> bool {
        let mut state = self.state.lock();
        if state.can_move_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Allocate the channel on `transport`. On success the shell is `Ready`
    /// and its output stream is returned; on failure it is `Failed` and the
    /// channel's own error is returned unchanged.
    pub async fn open<T: Transport>(
        &mut self,
        transport: &T,
    ) -> Result<mpsc::Receiver<ShellOutput>, SshError> {
        let pty = self.pty();
        match transport.open_shell(&pty).await {
            Ok(io) => {
                self.commands = Some(io.commands);
                self.transition(ShellState::Ready);
                Ok(io.output)
            }
            Err(e) => {
                self.transition(ShellState::Failed);
                Err(e)
            }
        }
    }

    /// Ready and the write side is still open
    pub fn is_writable(&self) -> bool {
        self.state() == ShellState::Ready
            && self.commands.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn sender(&self) -> Result<&mpsc::Sender<ShellCommand>, SshError> {
        match &self.commands {
            Some(tx) if self.state() == ShellState::Ready => Ok(tx),
            _ => Err(SshError::Channel("shell channel is not open".to_string())),
        }
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<(), SshError> {
        self.sender()?
            .send(ShellCommand::Data(data))
            .await
            .map_err(|e| {
                tracing::debug!("SSH send failed: {}", e);
                SshError::Channel(e.to_string())
            })
    }

    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.sender()?
            .send(ShellCommand::WindowChange { cols, rows })
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut pty = self.pty.lock();
        pty.cols = cols;
        pty.rows = rows;
        Ok(())
    }

    /// Ask the channel to close. The output stream ends with `Closed`.
    pub async fn close(&self) {
        if let Ok(tx) = self.sender() {
            let _ = tx.send(ShellCommand::Close).await;
        }
        self.mark_closed();
    }

    pub fn mark_closed(&self) -> bool {
        self.transition(ShellState::Closed)
    }
}
