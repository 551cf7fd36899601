//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisTask;

/// One statement submitted for analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementInput {
    /// The SQL text to analyze
    pub sql: String,

    /// Suggestion the client already has; skips analysis when present
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Request to start a batch of analyses.
#[derive(Debug, Clone, Deserialize)]
pub struct StartAnalysisRequest {
    pub statements: Vec<StatementInput>,
}

/// A session and the current state of its tasks.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSessionResponse {
    pub session_id: String,
    pub tasks: Vec<AnalysisTask>,
}

/// Response after a session was reaped.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    pub session_id: String,
    pub status: String,
}

/// Request for a single-shot rewrite.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeRequest {
    pub sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeResponse {
    pub optimized_query: String,
    pub explanation: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub max_concurrent_analyses: usize,
    /// Model driving the analysis loop
    pub model: String,
    pub customer_database_configured: bool,
}
