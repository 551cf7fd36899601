//! Tool system for the analysis loop.
//!
//! Tools are what the model can ask the orchestrator to run between turns.
//! Currently there is one: `run_customer_query`, a read-only diagnostic query
//! against the customer database.
//!
//! A tool never touches session state. It returns a [`ToolOutput`] and the
//! turn driver decides what to record.

mod customer_query;

pub use customer_query::{RunCustomerQuery, RUN_CUSTOMER_QUERY};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::customer_db::Row;
use crate::llm::{FunctionDefinition, ToolDefinition};

/// Marker shown in the audit trail for failed tool runs.
pub const QUERY_FAILED_PREVIEW: &str = "Query failed";

/// Max characters of a text result kept in the audit-trail preview.
const TEXT_PREVIEW_CHARS: usize = 100;

/// Result of running a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Tabular result
    Rows(Vec<Row>),
    /// Scalar or free-form text result
    Text(String),
    /// The tool failed; the message is fed back to the model
    Error(String),
}

impl ToolOutput {
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error(_))
    }

    /// Short, deterministic summary for the subquery audit trail.
    pub fn preview(&self) -> String {
        match self {
            ToolOutput::Rows(rows) if rows.is_empty() => "No data returned".to_string(),
            ToolOutput::Rows(rows) => format!("Returned {} rows", rows.len()),
            ToolOutput::Text(text) => truncate_preview(text),
            ToolOutput::Error(_) => QUERY_FAILED_PREVIEW.to_string(),
        }
    }

    /// Raw result as sent back to the model.
    pub fn to_model_string(&self) -> String {
        match self {
            ToolOutput::Rows(rows) => {
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            }
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Error(message) => format!("ERROR: {}", message),
        }
    }
}

fn truncate_preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TEXT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Diagnostic statement this call would run against the customer
    /// database, if any. Used for the audit trail before execution.
    fn subquery(&self, _args: &Value) -> Option<String> {
        None
    }

    /// Execute the tool with already-parsed arguments.
    async fn execute(&self, args: Value) -> ToolOutput;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the diagnostic query tool wired to `runner`.
    pub fn with_query_runner(runner: Arc<dyn crate::customer_db::QueryRunner>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RunCustomerQuery::new(runner)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!(tool = tool.name(), "Registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Get tool schemas in model-compatible format, sorted by name.
    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name. Unknown tools produce an error output rather
    /// than failing the caller.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutput {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolOutput::error(format!("Unknown function: {}", name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: i64) -> Row {
        let mut r = Row::new();
        r.insert("n".to_string(), json!(v));
        r
    }

    #[test]
    fn preview_counts_rows() {
        let out = ToolOutput::Rows(vec![row(1), row(2), row(3)]);
        assert_eq!(out.preview(), "Returned 3 rows");
        assert_eq!(ToolOutput::Rows(vec![]).preview(), "No data returned");
    }

    #[test]
    fn preview_truncates_text_at_100_chars() {
        let short = ToolOutput::Text("on".to_string());
        assert_eq!(short.preview(), "on");

        let exact = "x".repeat(100);
        assert_eq!(ToolOutput::Text(exact.clone()).preview(), exact);

        let long = "é".repeat(150);
        let preview = ToolOutput::Text(long).preview();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 103);
    }

    #[test]
    fn preview_marks_errors() {
        let out = ToolOutput::error("relation \"nope\" does not exist");
        assert_eq!(out.preview(), QUERY_FAILED_PREVIEW);
        assert_eq!(
            out.to_model_string(),
            "ERROR: relation \"nope\" does not exist"
        );
    }

    #[test]
    fn rows_serialize_for_the_model() {
        let out = ToolOutput::Rows(vec![row(7)]);
        assert_eq!(out.to_model_string(), r#"[{"n":7}]"#);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_output() {
        let registry = ToolRegistry::empty();
        let out = registry.execute("drop_everything", json!({})).await;
        assert_eq!(out, ToolOutput::error("Unknown function: drop_everything"));
    }
}
