use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Config};
use russh::{Disconnect, Pty};
use russh_sftp::client::SftpSession as RusshSftpSession;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;

use crate::config::{SessionIdentity, SshDefaults};
use crate::error::{SftpError, SshError};
use crate::security_log;
use crate::sftp::SftpFs;

use super::auth::ResolvedAuth;
use super::handler::ClientHandler;
use super::session;
use super::transport::{Connector, ExecOutput, PtyConfig, ShellIo, Transport};

/// Opens russh connections
pub struct SshConnector {
    config: Arc<Config>,
    exec_pty: PtyConfig,
    exec_timeout: Duration,
}

impl SshConnector {
    pub fn new(defaults: &SshDefaults) -> Self {
        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keepalive_interval: defaults.keepalive_interval(),
            keepalive_max: defaults.keepalive_max,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            exec_pty: PtyConfig::from_defaults(defaults),
            exec_timeout: defaults.exec_timeout(),
        }
    }

    async fn authenticate(
        handle: &mut client::Handle<ClientHandler>,
        identity: &SessionIdentity,
        auth: ResolvedAuth,
    ) -> Result<(), SshError> {
        let method_name = auth.method_name();
        let (host, port, username) = (&identity.host, identity.port, &identity.username);

        security_log::log_auth_attempt(host, port, username, method_name);

        let auth_result = match auth {
            ResolvedAuth::Password(password) => {
                // Use expose_secret() only at the point of authentication
                handle
                    .authenticate_password(username.as_str(), password.expose_secret())
                    .await
            }
            ResolvedAuth::PublicKey(key) => {
                handle.authenticate_publickey(username.as_str(), key).await
            }
        };

        let auth_result = match auth_result {
            Ok(result) => result,
            Err(e) => {
                let reason = e.to_string();
                security_log::log_auth_failure(host, port, username, method_name, &reason);
                return Err(SshError::AuthenticationFailed(reason));
            }
        };

        if !auth_result.success() {
            let reason = "Authentication rejected by server";
            security_log::log_auth_failure(host, port, username, method_name, reason);
            return Err(SshError::AuthenticationFailed(reason.to_string()));
        }

        security_log::log_auth_success(host, port, username, method_name);
        Ok(())
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(&SshDefaults::default())
    }
}

impl Connector for SshConnector {
    type Transport = SshTransport;

    async fn connect(
        &self,
        identity: &SessionIdentity,
        auth: ResolvedAuth,
    ) -> Result<SshTransport, SshError> {
        let stream = TcpStream::connect((identity.host.as_str(), identity.port))
            .await
            .map_err(|e| SshError::ConnectionFailed {
                host: identity.host.clone(),
                port: identity.port,
                reason: e.to_string(),
            })?;

        let handler = ClientHandler::new(identity.host.clone(), identity.port);
        let mut handle = client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed {
                host: identity.host.clone(),
                port: identity.port,
                reason: e.to_string(),
            })?;

        Self::authenticate(&mut handle, identity, auth).await?;

        Ok(SshTransport {
            handle: Arc::new(handle),
            exec_pty: self.exec_pty.clone(),
            exec_timeout: self.exec_timeout,
        })
    }
}

/// An authenticated russh connection
pub struct SshTransport {
    handle: Arc<client::Handle<ClientHandler>>,
    exec_pty: PtyConfig,
    exec_timeout: Duration,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("handle", &"<handle>")
            .field("exec_timeout", &self.exec_timeout)
            .finish()
    }
}

fn terminal_modes(pty: &PtyConfig) -> [(Pty, u32); 3] {
    [
        (Pty::ICANON, u32::from(pty.canonical)),
        (Pty::ECHO, u32::from(pty.echo)),
        (Pty::ISIG, u32::from(pty.signals)),
    ]
}

impl Transport for SshTransport {
    type Fs = SftpFs;

    async fn open_shell(&self, pty: &PtyConfig) -> Result<ShellIo, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        channel
            .request_pty(
                false,
                &pty.term,
                pty.cols,
                pty.rows,
                0,
                0,
                &terminal_modes(pty),
            )
            .await
            .map_err(|e| SshError::Channel(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::Channel(format!("Shell request failed: {}", e)))?;

        Ok(session::spawn_shell_bridge(self.handle.clone(), channel))
    }

    async fn exec_with_pty(&self, command: &str) -> Result<ExecOutput, SshError> {
        session::exec_with_pty(&self.handle, command, &self.exec_pty, self.exec_timeout).await
    }

    async fn open_sftp(&self) -> Result<SftpFs, SftpError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SftpError::ChannelOpen(e.to_string()))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| {
                SftpError::ChannelOpen(format!("Failed to request SFTP subsystem: {}", e))
            })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| {
                SftpError::ChannelOpen(format!("Failed to initialize SFTP session: {}", e))
            })?;

        Ok(SftpFs::new(sftp))
    }

    fn is_writable(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn disconnect(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_uses_keepalive_defaults() {
        let connector = SshConnector::default();
        assert_eq!(
            connector.config.keepalive_interval,
            Some(Duration::from_secs(30))
        );
        assert_eq!(connector.config.keepalive_max, 3);
        assert_eq!(
            connector.config.inactivity_timeout,
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn zero_keepalive_sets_none_interval() {
        let defaults = SshDefaults {
            keepalive_interval_secs: 0,
            ..Default::default()
        };
        let connector = SshConnector::new(&defaults);
        assert_eq!(connector.config.keepalive_interval, None);
    }

    #[test]
    fn exec_uses_configured_timeout() {
        let defaults = SshDefaults {
            exec_timeout_secs: 3,
            ..Default::default()
        };
        let connector = SshConnector::new(&defaults);
        assert_eq!(connector.exec_timeout, Duration::from_secs(3));
        assert_eq!(connector.exec_pty.term, "xterm-256color");
    }

    #[test]
    fn terminal_modes_follow_profile() {
        let modes = terminal_modes(&PtyConfig::default());
        assert!(modes.iter().any(|m| matches!(m, (Pty::ICANON, 0))));
        assert!(modes.iter().any(|m| matches!(m, (Pty::ECHO, 1))));
        assert!(modes.iter().any(|m| matches!(m, (Pty::ISIG, 1))));
    }
}
