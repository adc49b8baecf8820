//! Registry of in-flight transfers, keyed by transfer id.
//!
//! A task enters the registry when its upload is requested and leaves it
//! when its [`TransferGuard`] drops at terminal resolution. Cancellation is
//! cooperative: [`TransferRegistry::cancel`] flips the task's state and wakes
//! the upload loop, which drops both streams and resolves as cancelled.
//! A task settles exactly once, as either finished or cancelled; a cancel
//! that arrives after the upload settled is reported as not found.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::SftpError;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

/// State shared between an upload and whoever may cancel it
#[derive(Debug)]
pub struct TransferTask {
    pub id: String,
    pub session_id: String,
    /// Connection of the session the upload runs on
    pub connection: Uuid,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub started_at: DateTime<Utc>,
    bytes_transferred: AtomicU64,
    state: AtomicU8,
    cancel_tx: watch::Sender<bool>,
}

impl TransferTask {
    fn new(
        id: String,
        session_id: String,
        connection: Uuid,
        local_path: PathBuf,
        remote_path: String,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id,
            session_id,
            connection,
            local_path,
            remote_path,
            started_at: Utc::now(),
            bytes_transferred: AtomicU64::new(0),
            state: AtomicU8::new(RUNNING),
            cancel_tx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    fn settle(&self, next: u8) -> bool {
        self.state
            .compare_exchange(RUNNING, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Settle as finished. Returns false if a cancel got there first.
    pub fn finish(&self) -> bool {
        self.settle(FINISHED) || self.state.load(Ordering::SeqCst) == FINISHED
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub(crate) fn add_bytes(&self, n: u64) -> u64 {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Receiver that flips to `true` on cancellation
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Settle as cancelled. Returns false if the task already settled.
    fn mark_cancelled(&self) -> bool {
        if !self.settle(CANCELLED) {
            return false;
        }
        self.cancel_tx.send_replace(true);
        true
    }
}

/// Resolve once `signal` reports cancellation
pub async fn cancelled(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone means the task is gone, nothing can cancel it anymore
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferRegistry {
    tasks: Arc<Mutex<HashMap<String, Arc<TransferTask>>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer. Without a requested id one is derived from the
    /// session id and the current time.
    pub fn register(
        &self,
        requested_id: Option<String>,
        session_id: &str,
        connection: Uuid,
        local_path: PathBuf,
        remote_path: String,
    ) -> Result<TransferGuard, SftpError> {
        let mut tasks = self.tasks.lock();

        let id = match requested_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                if tasks.contains_key(&id) {
                    return Err(SftpError::TransferIdInUse(id));
                }
                id
            }
            None => {
                let base = format!("{}-{}", session_id, Utc::now().timestamp_millis());
                if tasks.contains_key(&base) {
                    let suffix = Uuid::new_v4().simple().to_string();
                    format!("{}-{}", base, &suffix[..8])
                } else {
                    base
                }
            }
        };

        let task = Arc::new(TransferTask::new(
            id.clone(),
            session_id.to_string(),
            connection,
            local_path,
            remote_path,
        ));
        tasks.insert(id, task.clone());

        Ok(TransferGuard {
            registry: self.clone(),
            task,
        })
    }

    /// Cancel a transfer owned by `session_id`.
    ///
    /// Unknown, settled, or already-cancelled transfers report
    /// `TransferNotFound`.
    pub fn cancel(&self, session_id: &str, transfer_id: &str) -> Result<(), SftpError> {
        let task = self
            .get(transfer_id)
            .ok_or_else(|| SftpError::TransferNotFound(transfer_id.to_string()))?;

        if task.session_id != session_id {
            return Err(SftpError::SessionMismatch {
                transfer_id: transfer_id.to_string(),
                session_id: session_id.to_string(),
            });
        }

        if !task.mark_cancelled() {
            return Err(SftpError::TransferNotFound(transfer_id.to_string()));
        }

        tracing::info!("Cancel requested for transfer {}", transfer_id);
        Ok(())
    }

    /// Cancel every transfer running on `connection`, returning how many
    /// were signalled
    pub fn cancel_connection(&self, connection: Uuid) -> usize {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.connection == connection)
            .cloned()
            .collect();

        tasks.iter().filter(|t| t.mark_cancelled()).count()
    }

    pub fn get(&self, transfer_id: &str) -> Option<Arc<TransferTask>> {
        self.tasks.lock().get(transfer_id).cloned()
    }

    pub fn active_for(&self, session_id: &str) -> Vec<String> {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.session_id == session_id)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn remove(&self, task: &Arc<TransferTask>) {
        let mut tasks = self.tasks.lock();
        if tasks
            .get(&task.id)
            .is_some_and(|current| Arc::ptr_eq(current, task))
        {
            tasks.remove(&task.id);
        }
    }
}

/// Keeps a task registered until the upload resolves
#[derive(Debug)]
pub struct TransferGuard {
    registry: TransferRegistry,
    task: Arc<TransferTask>,
}

impl TransferGuard {
    pub fn task(&self) -> &Arc<TransferTask> {
        &self.task
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &TransferRegistry, id: Option<&str>) -> TransferGuard {
        registry
            .register(
                id.map(String::from),
                "s1",
                Uuid::nil(),
                PathBuf::from("/tmp/a.txt"),
                "/srv/a.txt".into(),
            )
            .unwrap()
    }

    #[test]
    fn generated_ids_start_with_session() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, None);
        assert!(guard.id().starts_with("s1-"));
    }

    #[test]
    fn generated_ids_do_not_collide() {
        let registry = TransferRegistry::new();
        let guards: Vec<_> = (0..20).map(|_| register(&registry, None)).collect();
        assert_eq!(registry.len(), guards.len());
    }

    #[test]
    fn requested_id_in_use_is_rejected() {
        let registry = TransferRegistry::new();
        let _guard = register(&registry, Some("t1"));
        let err = registry
            .register(Some("t1".into()), "s1", Uuid::nil(), PathBuf::from("/x"), "/y".into())
            .unwrap_err();
        assert!(matches!(err, SftpError::TransferIdInUse(_)));
    }

    #[test]
    fn guard_drop_removes_entry() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));
        assert!(registry.get("t1").is_some());
        drop(guard);
        assert!(registry.get("t1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn second_cancel_reports_not_found() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));

        registry.cancel("s1", "t1").unwrap();
        assert!(guard.task().is_cancelled());
        assert!(matches!(
            registry.cancel("s1", "t1"),
            Err(SftpError::TransferNotFound(_))
        ));
    }

    #[test]
    fn cancel_checks_owning_session() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));

        assert!(matches!(
            registry.cancel("other", "t1"),
            Err(SftpError::SessionMismatch { .. })
        ));
        assert!(!guard.task().is_cancelled());
    }

    #[test]
    fn cancel_unknown_transfer_is_not_found() {
        let registry = TransferRegistry::new();
        assert!(matches!(
            registry.cancel("s1", "ghost"),
            Err(SftpError::TransferNotFound(_))
        ));
    }

    #[test]
    fn cancel_connection_signals_only_its_transfers() {
        let registry = TransferRegistry::new();
        let old_connection = Uuid::new_v4();
        let new_connection = Uuid::new_v4();
        let old = registry
            .register(Some("t1".into()), "s1", old_connection, PathBuf::from("/x"), "/y".into())
            .unwrap();
        let reconnected = registry
            .register(Some("t2".into()), "s1", new_connection, PathBuf::from("/x"), "/z".into())
            .unwrap();

        assert_eq!(registry.cancel_connection(old_connection), 1);
        assert!(old.task().is_cancelled());
        assert!(!reconnected.task().is_cancelled());
        assert_eq!(registry.active_for("s1").len(), 2);
    }

    #[test]
    fn cancel_after_finish_is_not_found() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));

        assert!(guard.task().finish());
        assert!(matches!(
            registry.cancel("s1", "t1"),
            Err(SftpError::TransferNotFound(_))
        ));
        assert!(!guard.task().is_cancelled());
    }

    #[test]
    fn finish_after_cancel_reports_cancelled() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));

        registry.cancel("s1", "t1").unwrap();
        assert!(!guard.task().finish());
        assert!(guard.task().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_signal_waiters() {
        let registry = TransferRegistry::new();
        let guard = register(&registry, Some("t1"));
        let mut signal = guard.task().cancel_signal();

        let waiter = tokio::spawn(async move { cancelled(&mut signal).await });
        registry.cancel("s1", "t1").unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
