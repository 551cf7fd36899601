//! Background Worker: runs one task end to end.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::driver::TurnDriver;
use super::progress::{ProgressReporter, SessionProgress, StatusUpdate};
use super::session::SessionStore;
use super::AnalysisError;
use crate::suggestions::SuggestionStore;

/// One queued analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub session_id: String,
    pub query_id: String,
    pub sql: String,
    pub cancel: CancellationToken,
}

pub struct AnalysisWorker {
    driver: TurnDriver,
    suggestions: Arc<dyn SuggestionStore>,
}

impl AnalysisWorker {
    pub fn new(driver: TurnDriver, suggestions: Arc<dyn SuggestionStore>) -> Self {
        Self {
            driver,
            suggestions,
        }
    }

    /// Drive `job` to a terminal state. Never returns an error: failures
    /// end up in the task's status for pollers to see.
    pub async fn execute(&self, sessions: Arc<SessionStore>, job: AnalysisJob) {
        let span = tracing::info_span!(
            "analysis",
            session_id = %job.session_id,
            query_id = %job.query_id
        );
        self.run_job(sessions, job).instrument(span).await
    }

    async fn run_job(&self, sessions: Arc<SessionStore>, job: AnalysisJob) {
        let progress = SessionProgress::new(sessions, job.session_id.clone(), job.query_id.clone());

        if job.cancel.is_cancelled() {
            self.fail(&progress, AnalysisError::Cancelled).await;
            return;
        }

        if let Err(e) = progress.update_status(StatusUpdate::Begin).await {
            tracing::warn!("Could not claim task: {}", e);
            return;
        }
        tracing::info!(model = %self.driver.model(), "Analysis started");

        match self.driver.run(&job.sql, &progress, &job.cancel).await {
            Ok(suggestion) => {
                let completed = progress
                    .update_status(StatusUpdate::Completed {
                        suggestion: suggestion.clone(),
                    })
                    .await;
                if let Err(e) = completed {
                    tracing::warn!("Could not record completion: {}", e);
                    return;
                }
                tracing::info!("Analysis completed");

                // Completed stands even if the cache write fails.
                if let Err(e) = self.suggestions.store(&job.sql, &suggestion).await {
                    tracing::warn!("Failed to persist suggestion: {}", e);
                }
            }
            Err(e) => self.fail(&progress, e).await,
        }
    }

    async fn fail(&self, progress: &SessionProgress, error: AnalysisError) {
        match &error {
            AnalysisError::Cancelled => tracing::info!("Analysis cancelled"),
            other => tracing::error!("Analysis failed: {}", other),
        }
        let update = StatusUpdate::Failed {
            message: error.to_string(),
        };
        if let Err(e) = progress.update_status(update).await {
            tracing::warn!("Could not record failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{final_text, query_call, tool_turn, FakeRunner, ScriptedLlm, Step};
    use crate::analysis::types::{AnalysisStatus, AnalysisTask};
    use crate::suggestions::{InMemorySuggestionStore, StoreError};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl SuggestionStore for BrokenStore {
        fn is_persistent(&self) -> bool {
            true
        }

        async fn lookup(&self, _sql: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn store(&self, _sql: &str, _suggestion: &str) -> Result<(), StoreError> {
            Err(StoreError::Query("disk full".to_string()))
        }
    }

    fn worker(llm: ScriptedLlm, store: Arc<dyn SuggestionStore>) -> AnalysisWorker {
        let tools = Arc::new(ToolRegistry::with_query_runner(Arc::new(FakeRunner::default())));
        AnalysisWorker::new(TurnDriver::new(Arc::new(llm), tools, "o3", 25), store)
    }

    async fn job(sessions: &SessionStore, sql: &str) -> AnalysisJob {
        let session_id = sessions.create_session().await;
        sessions
            .put_task(&session_id, AnalysisTask::pending("0", sql))
            .await
            .unwrap();
        let cancel = sessions.task_cancel_token(&session_id, "0").await.unwrap();
        AnalysisJob {
            session_id,
            query_id: "0".to_string(),
            sql: sql.to_string(),
            cancel,
        }
    }

    #[tokio::test]
    async fn completed_suggestion_is_persisted() {
        let sessions = Arc::new(SessionStore::new());
        let cache = Arc::new(InMemorySuggestionStore::new());
        let llm = ScriptedLlm::new().script(
            "orders",
            vec![
                tool_turn(vec![query_call("c1", "SELECT count(*) FROM orders")]),
                final_text("Index orders(customer_id)."),
            ],
        );
        let job = job(&sessions, "SELECT * FROM orders WHERE customer_id = 7").await;
        let sid = job.session_id.clone();

        worker(llm, cache.clone()).execute(Arc::clone(&sessions), job).await;

        let task = sessions.get_task(&sid, "0").await.unwrap();
        assert_eq!(task.status(), AnalysisStatus::Completed);
        assert_eq!(task.progress_percentage(), 100);
        assert_eq!(task.subquery_history().len(), 1);
        assert_eq!(
            cache
                .lookup("SELECT * FROM orders WHERE customer_id = 7")
                .await
                .unwrap()
                .as_deref(),
            Some("Index orders(customer_id).")
        );
    }

    #[tokio::test]
    async fn persistence_failure_does_not_revert_completion() {
        let sessions = Arc::new(SessionStore::new());
        let job = job(&sessions, "SELECT 1").await;
        let sid = job.session_id.clone();

        worker(ScriptedLlm::new(), Arc::new(BrokenStore))
            .execute(Arc::clone(&sessions), job)
            .await;

        let task = sessions.get_task(&sid, "0").await.unwrap();
        assert_eq!(task.status(), AnalysisStatus::Completed);
        assert!(!task.suggestion_text().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_recorded_on_the_task() {
        let sessions = Arc::new(SessionStore::new());
        let llm = ScriptedLlm::new().script(
            "users",
            vec![
                tool_turn(vec![query_call("c1", "SELECT 1")]),
                Step::Fail("rate limited".to_string()),
            ],
        );
        let job = job(&sessions, "SELECT * FROM users").await;
        let sid = job.session_id.clone();

        worker(llm, Arc::new(InMemorySuggestionStore::new()))
            .execute(Arc::clone(&sessions), job)
            .await;

        let task = sessions.get_task(&sid, "0").await.unwrap();
        assert_eq!(task.status(), AnalysisStatus::Error);
        assert_eq!(task.current_step(), "Error: rate limited");
        assert!(task.suggestion_text().is_empty());
    }

    #[tokio::test]
    async fn cancelled_job_fails_without_calling_the_model() {
        let sessions = Arc::new(SessionStore::new());
        let job = job(&sessions, "SELECT 1").await;
        let sid = job.session_id.clone();
        job.cancel.cancel();

        let llm = ScriptedLlm::new().script("SELECT 1", vec![Step::Fail("unreachable".to_string())]);
        worker(llm, Arc::new(InMemorySuggestionStore::new()))
            .execute(Arc::clone(&sessions), job)
            .await;

        let task = sessions.get_task(&sid, "0").await.unwrap();
        assert_eq!(task.status(), AnalysisStatus::Error);
        assert_eq!(task.current_step(), "Error: analysis cancelled");
    }
}
