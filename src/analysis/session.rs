//! Session Store: process-wide registry of analysis sessions.
//!
//! Each task lives in its own slot behind its own lock, so a worker updating
//! one task never waits on another task of the same session. The outer maps
//! are only locked long enough to look a slot up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{AnalysisTask, TransitionError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Task {query_id} not found in session {session_id}")]
    TaskNotFound {
        session_id: String,
        query_id: String,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),
}

struct TaskSlot {
    task: RwLock<AnalysisTask>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionTasks {
    order: Vec<String>,
    slots: HashMap<String, Arc<TaskSlot>>,
}

struct Session {
    cancel: CancellationToken,
    last_polled: RwLock<Instant>,
    tasks: RwLock<SessionTasks>,
}

impl Session {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            last_polled: RwLock::new(Instant::now()),
            tasks: RwLock::new(SessionTasks::default()),
        }
    }

    async fn snapshot(&self) -> Vec<AnalysisTask> {
        let tasks = self.tasks.read().await;
        let mut out = Vec::with_capacity(tasks.order.len());
        for id in &tasks.order {
            if let Some(slot) = tasks.slots.get(id) {
                out.push(slot.task.read().await.clone());
            }
        }
        out
    }
}

/// In-memory session registry. Nothing here survives a restart.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    async fn slot(&self, session_id: &str, query_id: &str) -> Result<Arc<TaskSlot>, SessionError> {
        let session = self.session(session_id).await?;
        let tasks = session.tasks.read().await;
        tasks
            .slots
            .get(query_id)
            .cloned()
            .ok_or_else(|| SessionError::TaskNotFound {
                session_id: session_id.to_string(),
                query_id: query_id.to_string(),
            })
    }

    /// Register an empty session and return its id.
    pub async fn create_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Session::new()));
        tracing::debug!(session_id = %session_id, "Session created");
        session_id
    }

    /// Insert a task, keyed by its `query_id`. A task with the same id is
    /// replaced in place and keeps its position.
    pub async fn put_task(&self, session_id: &str, task: AnalysisTask) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let mut tasks = session.tasks.write().await;
        let query_id = task.query_id().to_string();
        if let Some(slot) = tasks.slots.get(&query_id) {
            *slot.task.write().await = task;
            return Ok(());
        }
        let slot = Arc::new(TaskSlot {
            task: RwLock::new(task),
            cancel: session.cancel.child_token(),
        });
        tasks.order.push(query_id.clone());
        tasks.slots.insert(query_id, slot);
        Ok(())
    }

    /// Consistent snapshot of one task.
    pub async fn get_task(&self, session_id: &str, query_id: &str) -> Result<AnalysisTask, SessionError> {
        let slot = self.slot(session_id, query_id).await?;
        let task = slot.task.read().await.clone();
        Ok(task)
    }

    /// Snapshots of every task in insertion order.
    pub async fn list_tasks(&self, session_id: &str) -> Result<Vec<AnalysisTask>, SessionError> {
        let session = self.session(session_id).await?;
        Ok(session.snapshot().await)
    }

    /// Apply `mutate` atomically with respect to other updates of the same
    /// task. The change is committed only if `mutate` succeeds, so readers
    /// never see a half-applied update.
    pub async fn update_task<F>(
        &self,
        session_id: &str,
        query_id: &str,
        mutate: F,
    ) -> Result<AnalysisTask, SessionError>
    where
        F: FnOnce(&mut AnalysisTask) -> Result<(), TransitionError>,
    {
        let slot = self.slot(session_id, query_id).await?;
        let mut guard = slot.task.write().await;
        let mut next = guard.clone();
        mutate(&mut next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Unconditionally drop a session. Use [`super::reaper::reap`] for the
    /// guarded variant exposed to clients.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.cancel.cancel();
                Ok(())
            }
            None => Err(SessionError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Remove the session if `check` accepts its current tasks. The check
    /// runs under the registry write lock, so no poller or reaper can
    /// interleave. Returns `Ok(false)` when the session does not exist.
    pub async fn remove_if<E>(
        &self,
        session_id: &str,
        check: impl FnOnce(&[AnalysisTask]) -> Result<(), E>,
    ) -> Result<bool, E> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(session_id).cloned() else {
            return Ok(false);
        };
        let tasks = session.snapshot().await;
        check(&tasks)?;
        sessions.remove(session_id);
        session.cancel.cancel();
        Ok(true)
    }

    /// Cancellation token of one task (child of its session's token).
    pub async fn task_cancel_token(
        &self,
        session_id: &str,
        query_id: &str,
    ) -> Result<CancellationToken, SessionError> {
        Ok(self.slot(session_id, query_id).await?.cancel.clone())
    }

    /// Cancel every task of a session without removing it.
    pub async fn cancel_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.session(session_id).await?.cancel.cancel();
        Ok(())
    }

    /// Record that a client just polled this session.
    pub async fn touch(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        *session.last_polled.write().await = Instant::now();
        Ok(())
    }

    /// Sessions nobody polled for at least `timeout`.
    pub async fn idle_sessions(&self, timeout: Duration) -> Vec<String> {
        let sessions: Vec<(String, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect();

        let mut idle = Vec::new();
        for (id, session) in sessions {
            if session.last_polled.read().await.elapsed() >= timeout {
                idle.push(id);
            }
        }
        idle
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
