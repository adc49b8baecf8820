//! Session registry: the one place that knows which sessions are live.
//!
//! Each session id maps to at most one transport and shell. `connect`
//! fills the slot, and the per-session relay task empties it when the
//! shell ends. `disconnect` empties it on request. The map is the only
//! shared state; every mutation happens under its lock and no lock is
//! held across an await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::{AppConfig, ConnectConfig, SessionIdentity, SessionStatus, SessionStore};
use crate::error::{SftpError, SshError};
use crate::relay::{EventRelay, EventSender, SessionEvent, StatusPayload};
use crate::security_log;
use crate::sftp::transfer::{self, TransferRegistry};
use crate::sftp::{RemoteEntry, RemoteFs, UploadOutcome, UploadPlan, UploadRequest, run_upload};

use super::auth::ResolvedAuth;
use super::cooldown::ConnectCooldown;
use super::cwd::{self, WorkingDirectory};
use super::input::normalize_input;
use super::shell::ShellChannel;
use super::transport::{Connector, PtyConfig, ShellOutput, Transport};

/// How long `disconnect` waits for the relay task to drain
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Asks the user for a local file when an upload names none
pub trait FilePicker: Send + Sync {
    fn pick_file(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub connect_timeout: Duration,
    pub cooldown: Duration,
    pub pty: PtyConfig,
    pub chunk_size: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RegistryOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.ssh.connect_timeout(),
            cooldown: config.ssh.connect_cooldown(),
            pty: PtyConfig::from_defaults(&config.ssh),
            chunk_size: config.sftp.chunk_size,
        }
    }
}

/// Successful result of `connect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
    /// Repeated inside the cooldown window; nothing was done
    Suppressed,
    /// Another connect for this id is still running
    InProgress,
    /// The same identity is already live under another id
    Reused { existing_id: String },
}

impl ConnectOutcome {
    pub fn message(&self) -> String {
        match self {
            ConnectOutcome::Connected => "Connected".to_string(),
            ConnectOutcome::AlreadyConnected => "Already connected".to_string(),
            ConnectOutcome::Suppressed => "Duplicate connect request ignored".to_string(),
            ConnectOutcome::InProgress => "Connection already in progress".to_string(),
            ConnectOutcome::Reused { existing_id } => {
                format!("Already connected as session {}", existing_id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
}

impl DisconnectOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            DisconnectOutcome::Disconnected => "Disconnected",
            DisconnectOutcome::NotConnected => "No active connection",
        }
    }
}

struct LiveSession<T> {
    id: String,
    /// Distinguishes this connection from later ones under the same id
    connection: Uuid,
    identity: SessionIdentity,
    transport: Arc<T>,
    shell: ShellChannel,
    retired: AtomicBool,
    relay_task: Mutex<Option<JoinHandle<()>>>,
}

enum SessionSlot<T> {
    Connecting { transport: Option<Arc<T>> },
    Live(Arc<LiveSession<T>>),
}

struct Shared<T> {
    sessions: Mutex<HashMap<String, SessionSlot<T>>>,
    relay: Arc<EventRelay>,
    transfers: TransferRegistry,
    store: Option<Arc<dyn SessionStore>>,
}

impl<T: Transport> Shared<T> {
    fn live(&self, id: &str) -> Option<Arc<LiveSession<T>>> {
        match self.sessions.lock().get(id) {
            Some(SessionSlot::Live(live)) => Some(live.clone()),
            _ => None,
        }
    }

    fn persist_status(&self, id: &str, status: SessionStatus) {
        let Some(store) = &self.store else {
            return;
        };
        if store.get(id).is_none() {
            return;
        }
        if let Err(e) = store.update_status(id, status) {
            tracing::warn!("Failed to persist status for session {}: {}", id, e);
        }
    }

    fn emit_status(
        &self,
        id: &str,
        identity: &SessionIdentity,
        status: SessionStatus,
        message: Option<String>,
    ) {
        self.relay.emit(
            id,
            SessionEvent::StatusChange {
                session_id: id.to_string(),
                payload: StatusPayload {
                    status,
                    identity: identity.clone(),
                    message,
                },
            },
        );
        self.persist_status(id, status);
    }

    /// Tear down a live session exactly once.
    ///
    /// When a newer connection already holds the id, only this connection's
    /// own subscriber and transfers are released, and no status is reported
    /// for the id.
    async fn retire(&self, live: &Arc<LiveSession<T>>, failure: Option<String>) {
        if live.retired.swap(true, Ordering::SeqCst) {
            return;
        }

        let superseded = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&live.id) {
                Some(SessionSlot::Live(current)) if Arc::ptr_eq(current, live) => {
                    sessions.remove(&live.id);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        live.shell.mark_closed();
        let cancelled = self.transfers.cancel_connection(live.connection);
        if cancelled > 0 {
            tracing::info!(
                "Cancelled {} transfer(s) of closed session {}",
                cancelled,
                live.id
            );
        }

        if superseded {
            tracing::debug!("Session {} was replaced before its old connection closed", live.id);
        } else {
            let status = if failure.is_some() {
                SessionStatus::Error
            } else {
                SessionStatus::Disconnected
            };
            self.emit_status(&live.id, &live.identity, status, failure.clone());
            self.relay.emit(
                &live.id,
                SessionEvent::Disconnect {
                    session_id: live.id.clone(),
                },
            );
        }
        self.relay.detach(&live.id, live.connection);

        security_log::log_session_closed(&live.id, &live.identity.host, failure.as_deref());
        live.transport.disconnect().await;
    }
}

/// Forward shell output until the channel ends, then retire the session
async fn relay_output<T: Transport>(
    shared: Arc<Shared<T>>,
    live: Arc<LiveSession<T>>,
    mut output: mpsc::Receiver<ShellOutput>,
) {
    let mut failure = None;

    while let Some(msg) = output.recv().await {
        match msg {
            ShellOutput::Data(data) => {
                shared.relay.emit(
                    &live.id,
                    SessionEvent::Output {
                        session_id: live.id.clone(),
                        data,
                    },
                );
            }
            ShellOutput::Closed => break,
            ShellOutput::Failed(reason) => {
                failure = Some(reason);
                break;
            }
        }
    }

    shared.retire(&live, failure).await;
}

/// Owns every live session and gates all operations on them
pub struct SessionRegistry<C: Connector> {
    connector: C,
    options: RegistryOptions,
    cooldown: ConnectCooldown,
    shared: Arc<Shared<C::Transport>>,
    picker: Option<Arc<dyn FilePicker>>,
}

impl<C: Connector> SessionRegistry<C> {
    pub fn new(connector: C, options: RegistryOptions, relay: Arc<EventRelay>) -> Self {
        Self {
            connector,
            cooldown: ConnectCooldown::new(options.cooldown),
            options,
            shared: Arc::new(Shared {
                sessions: Mutex::new(HashMap::new()),
                relay,
                transfers: TransferRegistry::new(),
                store: None,
            }),
            picker: None,
        }
    }

    /// Report status changes to `store`. Must be set before first use.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.store = Some(store);
        }
        self
    }

    pub fn with_file_picker(mut self, picker: Arc<dyn FilePicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn relay(&self) -> &Arc<EventRelay> {
        &self.shared.relay
    }

    pub fn transfers(&self) -> &TransferRegistry {
        &self.shared.transfers
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.shared.sessions.lock().keys().cloned().collect()
    }

    /// Connect session `id` and open its shell. Events for the session go
    /// to `events` until it ends.
    pub async fn connect(
        &self,
        id: &str,
        config: ConnectConfig,
        events: EventSender,
    ) -> Result<ConnectOutcome, SshError> {
        if id.trim().is_empty() {
            return Err(SshError::InvalidConfig("session id is required".to_string()));
        }
        let identity = config.identity();

        if let Some(outcome) = self.existing_outcome(id, &identity) {
            tracing::debug!("Connect {} short-circuited: {:?}", id, outcome);
            return Ok(outcome);
        }

        config.validate()?;
        let auth = ResolvedAuth::resolve(&config).await?;

        if !self.cooldown.try_begin(id) {
            tracing::debug!("Connect {} suppressed by cooldown", id);
            return Ok(ConnectOutcome::Suppressed);
        }

        {
            let mut sessions = self.shared.sessions.lock();
            match sessions.get(id) {
                Some(SessionSlot::Connecting { .. }) => return Ok(ConnectOutcome::InProgress),
                Some(SessionSlot::Live(live)) if live.shell.is_writable() => {
                    return Ok(ConnectOutcome::AlreadyConnected);
                }
                // A dead session not yet retired is replaced; its relay
                // task will not remove the new slot.
                _ => {}
            }
            sessions.insert(
                id.to_string(),
                SessionSlot::Connecting { transport: None },
            );
        }

        let connection = self.shared.relay.attach(id, events);
        tracing::info!("Connecting session {} to {}", id, identity.address());

        match self.establish(id, connection, &identity, auth).await {
            Ok(()) => Ok(ConnectOutcome::Connected),
            Err(e) => {
                {
                    let mut sessions = self.shared.sessions.lock();
                    if matches!(sessions.get(id), Some(SessionSlot::Connecting { .. })) {
                        sessions.remove(id);
                    }
                }
                tracing::warn!("Connect {} failed: {}", id, e);
                self.shared
                    .emit_status(id, &identity, SessionStatus::Error, Some(e.to_string()));
                self.shared.relay.detach(id, connection);
                Err(e)
            }
        }
    }

    fn existing_outcome(&self, id: &str, identity: &SessionIdentity) -> Option<ConnectOutcome> {
        let sessions = self.shared.sessions.lock();

        if let Some(SessionSlot::Live(live)) = sessions.get(id) {
            if live.shell.is_writable() {
                return Some(ConnectOutcome::AlreadyConnected);
            }
        }

        sessions.iter().find_map(|(other_id, slot)| match slot {
            SessionSlot::Live(live)
                if other_id != id && live.identity == *identity && live.shell.is_writable() =>
            {
                Some(ConnectOutcome::Reused {
                    existing_id: other_id.clone(),
                })
            }
            _ => None,
        })
    }

    async fn establish(
        &self,
        id: &str,
        connection: Uuid,
        identity: &SessionIdentity,
        auth: ResolvedAuth,
    ) -> Result<(), SshError> {
        let transport = timeout(
            self.options.connect_timeout,
            self.connector.connect(identity, auth),
        )
        .await
        .map_err(|_| SshError::Timeout(identity.address()))??;
        let transport = Arc::new(transport);

        let still_wanted = {
            let mut sessions = self.shared.sessions.lock();
            match sessions.get_mut(id) {
                Some(SessionSlot::Connecting { transport: slot, .. }) => {
                    *slot = Some(transport.clone());
                    true
                }
                _ => false,
            }
        };
        if !still_wanted {
            transport.disconnect().await;
            return Err(SshError::Channel(
                "connection cancelled by disconnect".to_string(),
            ));
        }

        let mut shell = ShellChannel::new(self.options.pty.clone());
        let output = match shell.open(transport.as_ref()).await {
            Ok(output) => output,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        let live = Arc::new(LiveSession {
            id: id.to_string(),
            connection,
            identity: identity.clone(),
            transport: transport.clone(),
            shell,
            retired: AtomicBool::new(false),
            relay_task: Mutex::new(None),
        });

        let installed = {
            let mut sessions = self.shared.sessions.lock();
            if matches!(sessions.get(id), Some(SessionSlot::Connecting { .. })) {
                sessions.insert(id.to_string(), SessionSlot::Live(live.clone()));
                true
            } else {
                false
            }
        };
        if !installed {
            live.shell.close().await;
            transport.disconnect().await;
            return Err(SshError::Channel(
                "connection cancelled by disconnect".to_string(),
            ));
        }

        self.shared
            .emit_status(id, identity, SessionStatus::Connected, None);
        tracing::info!("Session {} connected to {}", id, identity.address());

        let task = tokio::spawn(relay_output(self.shared.clone(), live.clone(), output));
        *live.relay_task.lock() = Some(task);
        Ok(())
    }

    /// End session `id`. Absent sessions are not an error.
    pub async fn disconnect(&self, id: &str) -> DisconnectOutcome {
        let slot = self.shared.sessions.lock().remove(id);
        self.cooldown.reset(id);

        match slot {
            None => DisconnectOutcome::NotConnected,
            Some(SessionSlot::Connecting { transport, .. }) => {
                tracing::info!("Disconnect {} while connecting", id);
                if let Some(transport) = transport {
                    transport.disconnect().await;
                }
                DisconnectOutcome::Disconnected
            }
            Some(SessionSlot::Live(live)) => {
                tracing::info!("Disconnecting session {}", id);
                live.shell.close().await;

                let task = live.relay_task.lock().take();
                if let Some(mut task) = task {
                    if timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                        tracing::warn!("Relay task of session {} did not finish, aborting", id);
                        task.abort();
                    }
                }

                // No-op when the relay task already retired it
                self.shared.retire(&live, None).await;
                DisconnectOutcome::Disconnected
            }
        }
    }

    /// Disconnect every session
    pub async fn shutdown(&self) {
        let ids = self.session_ids();
        tracing::info!("Shutting down {} session(s)", ids.len());
        futures::future::join_all(ids.iter().map(|id| self.disconnect(id))).await;
    }

    /// Whether `id` has a writable shell, or a writable transport while its
    /// shell is still being opened
    pub fn is_alive(&self, id: &str) -> bool {
        match self.shared.sessions.lock().get(id) {
            Some(SessionSlot::Live(live)) => live.shell.is_writable(),
            Some(SessionSlot::Connecting {
                transport: Some(transport),
                ..
            }) => transport.is_writable(),
            _ => false,
        }
    }

    fn writable_session(&self, id: &str) -> Result<Arc<LiveSession<C::Transport>>, SshError> {
        self.shared
            .live(id)
            .filter(|live| live.shell.is_writable())
            .ok_or_else(|| SshError::NotConnected(id.to_string()))
    }

    /// Write keystrokes to the shell of `id`
    pub async fn send_input(&self, id: &str, data: &[u8]) -> Result<(), SshError> {
        let live = self.writable_session(id)?;
        let data = normalize_input(data).into_owned();
        live.shell.write(data).await
    }

    pub async fn resize(&self, id: &str, cols: u32, rows: u32) -> Result<(), SshError> {
        let live = self.writable_session(id)?;
        live.shell.resize(cols, rows).await
    }

    fn sftp_session(&self, id: &str) -> Result<Arc<LiveSession<C::Transport>>, SftpError> {
        self.shared
            .live(id)
            .filter(|live| live.transport.is_writable())
            .ok_or_else(|| SftpError::NotConnected(id.to_string()))
    }

    async fn open_fs(
        &self,
        live: &LiveSession<C::Transport>,
    ) -> Result<<C::Transport as Transport>::Fs, SftpError> {
        let fs = live.transport.open_sftp().await?;
        security_log::log_sftp_channel_opened(&live.id);
        Ok(fs)
    }

    /// Upload one local file. Progress goes to the session's subscriber;
    /// the returned value is the terminal result.
    pub async fn upload_file(&self, request: UploadRequest) -> Result<UploadOutcome, SftpError> {
        if request.session_id.trim().is_empty() {
            return Err(SftpError::InvalidRequest("session id is required".to_string()));
        }
        if request.remote_path.trim().is_empty() {
            return Err(SftpError::InvalidRequest("remote path is required".to_string()));
        }

        let session_id = request.session_id.clone();
        let live = self.sftp_session(&session_id)?;

        let local_path = match request.local_path {
            Some(path) => path,
            None => self
                .picker
                .as_ref()
                .and_then(|picker| picker.pick_file())
                .ok_or(SftpError::NoFileSelected)?,
        };

        let plan = UploadPlan::prepare(&local_path, &request.remote_path).await?;
        let guard = self.shared.transfers.register(
            request.transfer_id,
            &session_id,
            live.connection,
            plan.local_path.clone(),
            plan.remote_path.clone(),
        )?;
        let task = guard.task().clone();

        security_log::log_upload_started(&session_id, &task.id, &plan.remote_path, plan.file_size);

        let mut signal = task.cancel_signal();
        let opened = tokio::select! {
            biased;
            _ = transfer::cancelled(&mut signal) => None,
            fs = self.open_fs(&live) => Some(fs),
        };
        let fs = match opened {
            Some(Ok(fs)) => fs,
            Some(Err(e)) if task.finish() => return Err(e),
            _ => {
                security_log::log_upload_cancelled(&session_id, &task.id);
                return Ok(UploadOutcome::Cancelled { transfer_id: task.id.clone() });
            }
        };

        let relay = self.shared.relay.clone();
        let outcome = run_upload(&fs, &plan, &task, self.options.chunk_size, |progress| {
            relay.emit(&session_id, SessionEvent::UploadProgress(progress));
        })
        .await;

        match &outcome {
            Ok(UploadOutcome::Completed(details)) => security_log::log_upload_completed(
                &session_id,
                &task.id,
                &details.remote_path,
                details.file_size,
            ),
            Ok(UploadOutcome::Cancelled { .. }) => {
                security_log::log_upload_cancelled(&session_id, &task.id)
            }
            Err(e) => tracing::warn!("Upload {} failed: {}", task.id, e),
        }

        drop(guard);
        outcome
    }

    pub fn cancel_upload(&self, session_id: &str, transfer_id: &str) -> Result<(), SftpError> {
        self.shared.transfers.cancel(session_id, transfer_id)
    }

    pub async fn list_directory(
        &self,
        session_id: &str,
        remote_path: &str,
    ) -> Result<Vec<RemoteEntry>, SftpError> {
        let live = self.sftp_session(session_id)?;
        let fs = self.open_fs(&live).await?;
        fs.read_dir(remote_path).await.map_err(|e| {
            SftpError::FileOperation(format!("Failed to read directory {}: {}", remote_path, e))
        })
    }

    pub async fn create_directory(
        &self,
        session_id: &str,
        remote_path: &str,
    ) -> Result<(), SftpError> {
        if remote_path.trim().is_empty() {
            return Err(SftpError::InvalidRequest("remote path is required".to_string()));
        }
        let live = self.sftp_session(session_id)?;
        let fs = self.open_fs(&live).await?;
        fs.mkdir(remote_path).await.map_err(|e| {
            SftpError::FileOperation(format!("Failed to create directory {}: {}", remote_path, e))
        })
    }

    /// Read the shell's working directory with `pwd`. Only a missing
    /// session is an error; `pwd` failures fall back to a default.
    pub async fn get_current_directory(
        &self,
        session_id: &str,
    ) -> Result<WorkingDirectory, SshError> {
        let live = self
            .shared
            .live(session_id)
            .ok_or_else(|| SshError::NotConnected(session_id.to_string()))?;

        let result = live.transport.exec_with_pty("pwd").await;
        Ok(cwd::resolve(result, &live.identity.username))
    }
}
