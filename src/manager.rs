//! Registry of running sessions.
//!
//! Each started session runs in its own task under a [`ScanScheduler`]. The
//! manager keeps the stop signal, the latest snapshot and the join handle of
//! every task, keyed by [`SessionKey`].

use crate::config::{SessionConfig, SessionKey};
use crate::scanner::Scanner;
use crate::scheduler::{DEFAULT_SETTLE, ScanScheduler};
use crate::session::{PillSession, SessionContext, SessionError, SessionSnapshot, SessionState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// How long [`SessionManager::stop`] waits for a session task before aborting it.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(60);

struct SessionHandle {
    stop: watch::Sender<bool>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<PillSession>,
}

pub struct SessionManager {
    context: SessionContext,
    scanner: Arc<dyn Scanner>,
    settle: Duration,
    join_timeout: Duration,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
}

impl SessionManager {
    pub fn new(context: SessionContext, scanner: Arc<dyn Scanner>) -> Self {
        SessionManager {
            context,
            scanner,
            settle: DEFAULT_SETTLE,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Pause between scan windows of every session started afterwards.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    /// Initialize a session and start scanning for it.
    ///
    /// # Errors
    /// [`SessionError::AlreadyRunning`] for a duplicate key, or the error
    /// that stopped initialization.
    pub async fn start(&self, config: SessionConfig) -> Result<SessionSnapshot, SessionError> {
        let key = config.key();
        if self.is_running(&key).await {
            return Err(SessionError::AlreadyRunning(key));
        }

        // Initialization talks to the service; keep the registry unlocked meanwhile.
        let mut session = PillSession::new(config, self.context.clone());
        session.initialize().await?;

        let mut sessions = self.sessions.lock().await;
        if sessions.get(&key).is_some_and(|h| !h.task.is_finished()) {
            session.stop();
            return Err(SessionError::AlreadyRunning(key));
        }

        let snapshot = session.snapshot();
        let (stop, stop_rx) = watch::channel(false);
        let (snapshot_tx, snapshots) = watch::channel(snapshot.clone());
        let scheduler = ScanScheduler::new(self.scanner.clone(), self.settle);
        let task = tokio::spawn(async move { scheduler.run(session, stop_rx, snapshot_tx).await });

        sessions.insert(
            key,
            SessionHandle {
                stop,
                snapshots,
                task,
            },
        );
        Ok(snapshot)
    }

    /// Start every configured session. Failures are reported and skipped.
    ///
    /// Returns how many sessions were started.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for config in self.context.store.sessions().await {
            let key = config.key();
            match self.start(config).await {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::warn!(session = %key, error = %e, "session not started");
                    self.context
                        .observer
                        .on_status(&format!("Skipped session {key}: {e}"));
                }
            }
        }
        started
    }

    /// Stop a session and wait for its task to finish.
    ///
    /// A task that does not finish within the join timeout is aborted; its
    /// last published snapshot is returned.
    pub async fn stop(&self, key: &SessionKey) -> Result<SessionSnapshot, SessionError> {
        let handle = self
            .sessions
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| SessionError::NotRunning(key.clone()))?;
        let SessionHandle {
            stop,
            snapshots,
            mut task,
        } = handle;

        let _ = stop.send(true);
        match tokio::time::timeout(self.join_timeout, &mut task).await {
            Ok(Ok(session)) => Ok(session.snapshot()),
            Ok(Err(e)) => Err(SessionError::Task {
                key: key.clone(),
                message: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!(session = %key, timeout = ?self.join_timeout, "session did not stop in time, aborting");
                task.abort();
                let mut snapshot = snapshots.borrow().clone();
                snapshot.state = SessionState::Stopped;
                Ok(snapshot)
            }
        }
    }

    /// Stop every running session.
    pub async fn stop_all(&self) -> Vec<SessionSnapshot> {
        let keys: Vec<SessionKey> = self.sessions.lock().await.keys().cloned().collect();
        let mut stopped = Vec::with_capacity(keys.len());
        for key in keys {
            match self.stop(&key).await {
                Ok(snapshot) => stopped.push(snapshot),
                Err(e) => tracing::warn!(session = %key, error = %e, "failed to stop session"),
            }
        }
        stopped
    }

    /// Latest snapshot of every registered session, ordered by key.
    pub async fn status(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().await;
        let mut snapshots: Vec<SessionSnapshot> =
            sessions.values().map(|h| h.snapshots.borrow().clone()).collect();
        snapshots.sort_by_key(SessionSnapshot::key);
        snapshots
    }

    pub async fn is_running(&self, key: &SessionKey) -> bool {
        self.sessions
            .lock()
            .await
            .get(key)
            .is_some_and(|h| !h.task.is_finished())
    }
}
