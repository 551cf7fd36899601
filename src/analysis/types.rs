//! Analysis task data model and state machine.
//!
//! # Invariants
//! - `status` only moves forward through
//!   `Pending -> AnalyzingSchema -> RunningExplain -> GeneratingSuggestions -> Completed`,
//!   with `Error` reachable from any non-terminal state
//! - `progress_percentage` never decreases and is 100 iff `status == Completed`
//! - `subquery_history` is append-only
//! - a terminal task (Completed or Error) is immutable

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Progress reported while the model is still gathering information.
const GENERATING_BASE_PROGRESS: u8 = 50;
const GENERATING_MAX_PROGRESS: u8 = 90;

/// Status of an analysis task.
///
/// # State Machine
/// ```text
/// Pending(0) -> AnalyzingSchema(25) -> RunningExplain(50) -> GeneratingSuggestions(50..90) -> Completed(100)
///      \______________\____________________\_____________________\-> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    AnalyzingSchema,
    RunningExplain,
    GeneratingSuggestions,
    Completed,
    Error,
}

impl AnalysisStatus {
    /// Position in the forward ordering. `Error` has no position.
    fn rank(self) -> Option<u8> {
        match self {
            AnalysisStatus::Pending => Some(0),
            AnalysisStatus::AnalyzingSchema => Some(1),
            AnalysisStatus::RunningExplain => Some(2),
            AnalysisStatus::GeneratingSuggestions => Some(3),
            AnalysisStatus::Completed => Some(4),
            AnalysisStatus::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Error)
    }

    /// Whether `self -> next` is a legal transition. Staying in the same
    /// non-terminal state is allowed (a later turn re-enters
    /// `GeneratingSuggestions`).
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::AnalyzingSchema => "analyzing_schema",
            AnalysisStatus::RunningExplain => "running_explain",
            AnalysisStatus::GeneratingSuggestions => "generating_suggestions",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task is already {0}")]
    Terminal(AnalysisStatus),

    #[error("cannot move from {from} back to {to}")]
    Backward {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    #[error("no diagnostic query is in flight")]
    NoSubqueryInFlight,
}

/// A diagnostic query currently executing against the customer database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightSubquery {
    pub query: String,
    pub timestamp: String,
}

/// One executed diagnostic query in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubqueryRecord {
    pub query: String,
    pub timestamp: String,
    pub result_preview: String,
}

/// One SQL statement's analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisTask {
    query_id: String,
    sql_text: String,
    status: AnalysisStatus,
    current_step: String,
    progress_percentage: u8,
    suggestion_text: String,
    in_flight_subquery: Option<InFlightSubquery>,
    subquery_history: Vec<SubqueryRecord>,
}

impl AnalysisTask {
    /// A task waiting for a worker.
    pub fn pending(query_id: impl Into<String>, sql_text: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            sql_text: sql_text.into(),
            status: AnalysisStatus::Pending,
            current_step: "Queued for analysis".to_string(),
            progress_percentage: 0,
            suggestion_text: String::new(),
            in_flight_subquery: None,
            subquery_history: Vec::new(),
        }
    }

    /// A task resolved from a previously stored suggestion. Never scheduled.
    pub fn cached(
        query_id: impl Into<String>,
        sql_text: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            current_step: "Loaded cached suggestion".to_string(),
            progress_percentage: 100,
            suggestion_text: suggestion.into(),
            ..Self::pending(query_id, sql_text)
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn sql_text(&self) -> &str {
        &self.sql_text
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn progress_percentage(&self) -> u8 {
        self.progress_percentage
    }

    pub fn suggestion_text(&self) -> &str {
        &self.suggestion_text
    }

    pub fn in_flight_subquery(&self) -> Option<&InFlightSubquery> {
        self.in_flight_subquery.as_ref()
    }

    pub fn subquery_history(&self) -> &[SubqueryRecord] {
        &self.subquery_history
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(
        &mut self,
        next: AnalysisStatus,
        progress: u8,
        step: String,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Backward {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.current_step = step;
        // 100 is reserved for Completed; everything else tops out below it.
        let ceiling = if next == AnalysisStatus::Completed { 100 } else { 99 };
        self.progress_percentage = self.progress_percentage.max(progress).min(ceiling);
        Ok(())
    }

    /// Worker claimed the task.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(
            AnalysisStatus::AnalyzingSchema,
            25,
            "Analyzing schema".to_string(),
        )
    }

    /// First diagnostic query of the task is an EXPLAIN.
    pub fn running_explain(&mut self) -> Result<(), TransitionError> {
        self.transition(
            AnalysisStatus::RunningExplain,
            GENERATING_BASE_PROGRESS,
            "Running EXPLAIN".to_string(),
        )
    }

    /// Tool calls of turn `turn` (1-based) have been answered.
    pub fn generating(&mut self, turn: usize) -> Result<(), TransitionError> {
        let step = turn.saturating_sub(1).min(u8::MAX as usize) as u8;
        let progress = GENERATING_BASE_PROGRESS
            .saturating_add(step.saturating_mul(10))
            .min(GENERATING_MAX_PROGRESS);
        self.transition(
            AnalysisStatus::GeneratingSuggestions,
            progress,
            format!("Generating suggestions (turn {})", turn),
        )
    }

    pub fn complete(&mut self, suggestion: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(
            AnalysisStatus::Completed,
            100,
            "Analysis complete".to_string(),
        )?;
        self.suggestion_text = suggestion.into();
        self.in_flight_subquery = None;
        Ok(())
    }

    /// Progress is kept as-is; the message lands in `current_step`.
    pub fn fail(&mut self, message: impl std::fmt::Display) -> Result<(), TransitionError> {
        let progress = self.progress_percentage;
        self.transition(AnalysisStatus::Error, progress, format!("Error: {}", message))?;
        self.in_flight_subquery = None;
        Ok(())
    }

    pub fn start_subquery(
        &mut self,
        query: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.in_flight_subquery = Some(InFlightSubquery {
            query: query.into(),
            timestamp: timestamp.into(),
        });
        Ok(())
    }

    /// Move the in-flight query into the history with its preview.
    pub fn finish_subquery(&mut self, preview: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        let in_flight = self
            .in_flight_subquery
            .take()
            .ok_or(TransitionError::NoSubqueryInFlight)?;
        self.subquery_history.push(SubqueryRecord {
            query: in_flight.query,
            timestamp: in_flight.timestamp,
            result_preview: preview.into(),
        });
        Ok(())
    }
}
