//! Session Reaper: guarded deletion and the idle sweep.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::session::SessionStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CleanupError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Not all analyses are complete (pending: {})", .pending.join(", "))]
    NotAllComplete { pending: Vec<String> },
}

/// Delete `session_id` only if every task is Completed or Error. A refusal
/// leaves the session untouched.
pub async fn reap(store: &SessionStore, session_id: &str) -> Result<(), CleanupError> {
    let removed = store
        .remove_if(session_id, |tasks| {
            let pending: Vec<String> = tasks
                .iter()
                .filter(|t| !t.is_terminal())
                .map(|t| t.query_id().to_string())
                .collect();
            if pending.is_empty() {
                Ok(())
            } else {
                Err(CleanupError::NotAllComplete { pending })
            }
        })
        .await?;

    if removed {
        tracing::info!(session_id = %session_id, "Session reaped");
        Ok(())
    } else {
        Err(CleanupError::NotFound(session_id.to_string()))
    }
}

/// Cancel sessions idle for at least `idle_timeout` and delete the ones
/// whose tasks have all finished. Returns how many were deleted.
///
/// A session cancelled here but still running is deleted by a later sweep,
/// once its workers have observed the cancellation.
pub async fn sweep_idle(store: &SessionStore, idle_timeout: Duration) -> usize {
    let mut reaped = 0;
    for session_id in store.idle_sessions(idle_timeout).await {
        if store.cancel_session(&session_id).await.is_err() {
            continue;
        }
        match reap(store, &session_id).await {
            Ok(()) => reaped += 1,
            Err(CleanupError::NotAllComplete { pending }) => {
                tracing::debug!(
                    session_id = %session_id,
                    pending = pending.len(),
                    "Idle session cancelled, waiting for workers"
                );
            }
            Err(CleanupError::NotFound(_)) => {}
        }
    }
    reaped
}

/// Run [`sweep_idle`] every `interval` until `shutdown` fires.
pub fn spawn_idle_sweep(
    store: Arc<SessionStore>,
    interval: Duration,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = sweep_idle(&store, idle_timeout).await;
                    if reaped > 0 {
                        tracing::info!(reaped, "Idle sessions reaped");
                    }
                }
            }
        }
    })
}
