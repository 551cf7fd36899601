//! Asynchronous multi-turn analysis orchestrator.
//!
//! A batch of SQL statements becomes one session with one task per statement.
//! Tasks with a cached suggestion are created already completed; the rest are
//! queued behind a bounded worker pool. Each worker drives a tool-calling
//! conversation with the reasoning service, reporting progress into the
//! session store where clients poll it.
//!
//! ```text
//! Analyzer::start_batch ──► SessionStore ◄── poll / cleanup
//!        │ (FIFO queue)          ▲
//!        ▼                       │ SessionProgress
//!   worker pool ──► AnalysisWorker ──► TurnDriver ──► LlmClient
//!                                          └────────► ToolRegistry ──► QueryRunner
//! ```

pub mod dispatcher;
pub mod driver;
pub mod progress;
pub mod reaper;
pub mod session;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{AnalysisRequest, Analyzer, BatchHandle};
pub use driver::{TurnDriver, SYSTEM_INSTRUCTION};
pub use progress::{ProgressReporter, SessionProgress, StatusUpdate};
pub use reaper::CleanupError;
pub use session::{SessionError, SessionStore};
pub use types::{AnalysisStatus, AnalysisTask, InFlightSubquery, SubqueryRecord, TransitionError};
pub use worker::AnalysisWorker;

use thiserror::Error;

/// Why an analysis ended in `Error`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Reasoning-service call failed. Never retried at this level.
    #[error("{0}")]
    Llm(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("model returned an empty answer")]
    EmptyAnswer,

    #[error("turn limit of {0} exceeded")]
    TurnLimitExceeded(usize),

    #[error(transparent)]
    Session(#[from] SessionError),
}
