//! Progress reporting capability handed to the turn driver.

use std::sync::Arc;

use async_trait::async_trait;

use super::session::{SessionError, SessionStore};
use super::types::AnalysisTask;

/// Status change requested by a worker or driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Begin,
    RunningExplain,
    /// Tool calls of this (1-based) turn have been answered.
    Generating { turn: usize },
    Completed { suggestion: String },
    Failed { message: String },
}

impl StatusUpdate {
    fn apply(&self, task: &mut AnalysisTask) -> Result<(), super::types::TransitionError> {
        match self {
            StatusUpdate::Begin => task.begin(),
            StatusUpdate::RunningExplain => task.running_explain(),
            StatusUpdate::Generating { turn } => task.generating(*turn),
            StatusUpdate::Completed { suggestion } => task.complete(suggestion.clone()),
            StatusUpdate::Failed { message } => task.fail(message),
        }
    }
}

/// Where a running analysis reports what it is doing.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), SessionError>;

    /// A diagnostic query is about to run.
    async fn record_subquery(&self, query: &str, timestamp: &str) -> Result<(), SessionError>;

    /// The in-flight diagnostic query finished with this preview.
    async fn record_result(&self, preview: &str) -> Result<(), SessionError>;
}

/// Reports into one task slot of the session store.
pub struct SessionProgress {
    store: Arc<SessionStore>,
    session_id: String,
    query_id: String,
}

impl SessionProgress {
    pub fn new(store: Arc<SessionStore>, session_id: impl Into<String>, query_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            query_id: query_id.into(),
        }
    }
}

#[async_trait]
impl ProgressReporter for SessionProgress {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), SessionError> {
        self.store
            .update_task(&self.session_id, &self.query_id, |t| update.apply(t))
            .await?;
        Ok(())
    }

    async fn record_subquery(&self, query: &str, timestamp: &str) -> Result<(), SessionError> {
        self.store
            .update_task(&self.session_id, &self.query_id, |t| {
                t.start_subquery(query, timestamp)
            })
            .await?;
        Ok(())
    }

    async fn record_result(&self, preview: &str) -> Result<(), SessionError> {
        self.store
            .update_task(&self.session_id, &self.query_id, |t| t.finish_subquery(preview))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::AnalysisStatus;

    #[tokio::test]
    async fn reports_land_in_the_session_store() {
        let store = Arc::new(SessionStore::new());
        let sid = store.create_session().await;
        store
            .put_task(&sid, AnalysisTask::pending("0", "SELECT 1"))
            .await
            .unwrap();

        let progress = SessionProgress::new(Arc::clone(&store), sid.clone(), "0");
        progress.update_status(StatusUpdate::Begin).await.unwrap();
        progress.record_subquery("SELECT count(*) FROM t", "09:15:00").await.unwrap();

        let mid = store.get_task(&sid, "0").await.unwrap();
        assert_eq!(mid.status(), AnalysisStatus::AnalyzingSchema);
        assert!(mid.in_flight_subquery().is_some());

        progress.record_result("Returned 1 rows").await.unwrap();
        progress
            .update_status(StatusUpdate::Completed {
                suggestion: "done".to_string(),
            })
            .await
            .unwrap();

        let done = store.get_task(&sid, "0").await.unwrap();
        assert_eq!(done.subquery_history().len(), 1);
        assert_eq!(done.suggestion_text(), "done");
        assert_eq!(done.progress_percentage(), 100);
    }
}
