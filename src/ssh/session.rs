use std::sync::Arc;
use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::SshError;

use super::handler::ClientHandler;
use super::transport::{ExecOutput, PtyConfig, ShellCommand, ShellIo, ShellOutput};

const CHANNEL_BUFFER: usize = 256;

/// Spawn the task that owns a shell channel and bridge it to a [`ShellIo`].
///
/// Output chunks are forwarded in arrival order. The task ends on remote
/// close, on a `Close` command, or when the command side is dropped.
pub fn spawn_shell_bridge(
    handle: Arc<Handle<ClientHandler>>,
    mut channel: Channel<Msg>,
) -> ShellIo {
    let (command_tx, mut command_rx) = mpsc::channel::<ShellCommand>(CHANNEL_BUFFER);
    let (output_tx, output_rx) = mpsc::channel::<ShellOutput>(CHANNEL_BUFFER);

    tokio::spawn(async move {
        let end = loop {
            tokio::select! {
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            if output_tx.send(ShellOutput::Data(data.to_vec())).await.is_err() {
                                break None;
                            }
                        }
                        Some(ChannelMsg::ExtendedData { data, .. }) => {
                            if output_tx.send(ShellOutput::Data(data.to_vec())).await.is_err() {
                                break None;
                            }
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => {
                            break Some(ShellOutput::Closed);
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            tracing::debug!("Shell exit status: {}", exit_status);
                        }
                        Some(_) => {}
                        None => {
                            // Channel gone without a close: the connection died
                            if handle.is_closed() {
                                break Some(ShellOutput::Failed("connection lost".to_string()));
                            }
                            break Some(ShellOutput::Closed);
                        }
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(ShellCommand::Data(data)) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                tracing::error!("Failed to send data: {}", e);
                                break Some(ShellOutput::Failed(format!("write failed: {}", e)));
                            }
                        }
                        Some(ShellCommand::WindowChange { cols, rows }) => {
                            if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                                tracing::error!("Failed to send window change: {}", e);
                            }
                        }
                        Some(ShellCommand::Close) | None => {
                            let _ = channel.eof().await;
                            let _ = channel.close().await;
                            break Some(ShellOutput::Closed);
                        }
                    }
                }
            }
        };

        if let Some(last) = end {
            let _ = output_tx.send(last).await;
        }
    });

    ShellIo {
        commands: command_tx,
        output: output_rx,
    }
}

/// Run a command on its own pty-backed exec channel and collect its output.
pub async fn exec_with_pty(
    handle: &Handle<ClientHandler>,
    command: &str,
    pty: &PtyConfig,
    timeout_after: Duration,
) -> Result<ExecOutput, SshError> {
    let timeout_result = timeout(timeout_after, async {
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open channel: {}", e)))?;

        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(|e| SshError::Channel(format!("PTY request failed: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(format!("Failed to exec '{}': {}", command, e)))?;

        let mut output = ExecOutput::default();
        let mut closed_cleanly = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.stdout.push_str(&String::from_utf8_lossy(&data));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    output.stderr.push_str(&String::from_utf8_lossy(&data));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.exit_code = Some(exit_status);
                }
                // Exit status usually follows EOF, so keep reading until close
                Some(ChannelMsg::Eof) => closed_cleanly = true,
                Some(ChannelMsg::Close) => {
                    closed_cleanly = true;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }

        if !closed_cleanly && output.exit_code.is_none() {
            output.stream_error = Some("channel closed before the command finished".to_string());
        }

        Ok(output)
    })
    .await;

    match timeout_result {
        Ok(result) => result,
        Err(_) => Err(SshError::Channel(format!(
            "Command '{}' timed out after {} seconds",
            command,
            timeout_after.as_secs()
        ))),
    }
}
