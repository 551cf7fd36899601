//! Task Dispatcher and the operations exposed to callers.
//!
//! `start_batch` creates the session synchronously and returns before any
//! model or database work happens. Jobs go onto an unbounded FIFO queue; a
//! single pump task takes them in order and lines each one up for a worker
//! permit, so at most `max_concurrent` analyses run at once and nothing is
//! ever rejected for lack of capacity. A job cancelled while it waits gives
//! up its place in line and is failed right away.

use std::sync::Arc;
use std::task::Poll;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reaper::{self, CleanupError};
use super::session::{SessionError, SessionStore};
use super::types::AnalysisTask;
use super::worker::{AnalysisJob, AnalysisWorker};
use crate::config::AnalyzerConfig;

/// One statement of a batch.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub sql: String,
    /// Previously produced suggestion; the task is created already completed.
    pub cached_suggestion: Option<String>,
}

impl AnalysisRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            cached_suggestion: None,
        }
    }

    pub fn cached(sql: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            cached_suggestion: Some(suggestion.into()),
        }
    }
}

/// Result of `start_batch`: the new session and every task's initial state.
#[derive(Debug, Clone, Serialize)]
pub struct BatchHandle {
    pub session_id: String,
    pub tasks: Vec<AnalysisTask>,
}

pub struct Analyzer {
    sessions: Arc<SessionStore>,
    queue: mpsc::UnboundedSender<AnalysisJob>,
    config: AnalyzerConfig,
    shutdown: CancellationToken,
}

impl Analyzer {
    /// Create the analyzer and start its queue pump. Must be called from
    /// within a Tokio runtime.
    pub fn new(worker: Arc<AnalysisWorker>, config: AnalyzerConfig) -> Self {
        let sessions = Arc::new(SessionStore::new());
        let (queue, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        tokio::spawn(pump(rx, worker, Arc::clone(&sessions), permits));

        Self {
            sessions,
            queue,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Create a session for `requests` and schedule every uncached entry.
    ///
    /// Query ids are the entry's position (`"0"`, `"1"`, ...). The returned
    /// snapshots are taken before any job is enqueued.
    pub async fn start_batch(&self, requests: Vec<AnalysisRequest>) -> Result<BatchHandle, SessionError> {
        let session_id = self.sessions.create_session().await;
        let mut jobs = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            let query_id = index.to_string();
            match request.cached_suggestion {
                Some(suggestion) => {
                    self.sessions
                        .put_task(&session_id, AnalysisTask::cached(&query_id, &request.sql, suggestion))
                        .await?;
                }
                None => {
                    self.sessions
                        .put_task(&session_id, AnalysisTask::pending(&query_id, &request.sql))
                        .await?;
                    let cancel = self.sessions.task_cancel_token(&session_id, &query_id).await?;
                    jobs.push(AnalysisJob {
                        session_id: session_id.clone(),
                        query_id,
                        sql: request.sql,
                        cancel,
                    });
                }
            }
        }

        let tasks = self.sessions.list_tasks(&session_id).await?;
        tracing::info!(
            session_id = %session_id,
            total = tasks.len(),
            scheduled = jobs.len(),
            "Analysis batch started"
        );

        for job in jobs {
            if self.queue.send(job).is_err() {
                tracing::error!(session_id = %session_id, "Analysis queue is closed");
                break;
            }
        }

        Ok(BatchHandle { session_id, tasks })
    }

    /// Current snapshots of a session's tasks. Also marks the session as
    /// recently polled for the idle sweep.
    pub async fn poll(&self, session_id: &str) -> Result<Vec<AnalysisTask>, SessionError> {
        self.sessions.touch(session_id).await?;
        self.sessions.list_tasks(session_id).await
    }

    /// Guarded delete; see [`reaper::reap`].
    pub async fn cleanup(&self, session_id: &str) -> Result<(), CleanupError> {
        reaper::reap(&self.sessions, session_id).await
    }

    /// Start the periodic idle sweep. It stops when the analyzer is dropped.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        reaper::spawn_idle_sweep(
            Arc::clone(&self.sessions),
            self.config.reaper_interval,
            self.config.session_idle_timeout,
            self.shutdown.clone(),
        )
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn pump(
    mut rx: mpsc::UnboundedReceiver<AnalysisJob>,
    worker: Arc<AnalysisWorker>,
    sessions: Arc<SessionStore>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = rx.recv().await {
        let worker = Arc::clone(&worker);
        let sessions = Arc::clone(&sessions);

        // Cancelled while queued: record it without waiting for capacity.
        if job.cancel.is_cancelled() {
            tokio::spawn(async move { worker.execute(sessions, job).await });
            continue;
        }

        // The first poll enqueues the waiter, and the semaphore hands out
        // permits in waiter order, so starts follow submission order.
        let mut acquire = Box::pin(Arc::clone(&permits).acquire_owned());
        let first = futures::poll!(acquire.as_mut());

        tokio::spawn(async move {
            let acquired = match first {
                Poll::Ready(acquired) => acquired,
                Poll::Pending => {
                    tokio::select! {
                        biased;
                        _ = job.cancel.cancelled() => {
                            worker.execute(sessions, job).await;
                            return;
                        }
                        acquired = acquire => acquired,
                    }
                }
            };
            match acquired {
                Ok(_permit) => worker.execute(sessions, job).await,
                Err(_) => tracing::warn!(
                    session_id = %job.session_id,
                    query_id = %job.query_id,
                    "Worker pool closed; analysis not started"
                ),
            }
        });
    }
    tracing::debug!("Analysis queue closed");
}
