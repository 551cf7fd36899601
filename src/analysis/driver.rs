//! Reasoning Turn Driver: the multi-turn tool-calling loop for one task.
//!
//! Per turn the accumulated conversation goes to the reasoning service. A
//! reply without tool calls is the final suggestion. Otherwise every call is
//! executed sequentially in emission order, its result appended to the
//! conversation tagged with the call id, and the loop continues.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressReporter, StatusUpdate};
use super::AnalysisError;
use crate::llm::{ChatMessage, LlmClient, OutputItem, Role, ToolCall};
use crate::tools::{ToolOutput, ToolRegistry};

pub const SYSTEM_INSTRUCTION: &str = "\
You are a senior database performance engineer specializing in YugabyteDB and PostgreSQL.
You are given a slow SQL statement from a customer's database and must recommend how to make it faster.

You have one tool, `run_customer_query`, which executes a read-only SQL query against the \
customer's database and returns the result. Use it to gather information before answering: \
inspect table definitions, row counts, existing indexes and statistics.

- Compare the latency of the original statement and any rewrite with \
`EXPLAIN (ANALYZE, DIST, FORMAT JSON)`.
- Validate proposed indexes with the `hypopg` extension before recommending them.
- Only read-only statements (SELECT, WITH, EXPLAIN, SHOW, VALUES) are allowed.

When you are done, answer in Markdown. Put every SQL statement in a fenced ```sql code block.";

/// Drives one analysis from the first model request to its final text.
pub struct TurnDriver {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    model: String,
    max_turns: usize,
}

impl TurnDriver {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, model: impl Into<String>, max_turns: usize) -> Self {
        Self {
            llm,
            tools,
            model: model.into(),
            max_turns,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run the loop for `sql` and return the model's final suggestion.
    ///
    /// Malformed arguments and tool failures are fed back to the model and
    /// never end the loop. A failed model call, a blank final answer,
    /// cancellation and running out of turns do.
    pub async fn run(
        &self,
        sql: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let tool_schemas = self.tools.get_tool_schemas();
        let mut messages = vec![
            ChatMessage::new(Role::System, SYSTEM_INSTRUCTION),
            ChatMessage::new(
                Role::User,
                format!("Analyze and optimize this SQL statement:\n\n```sql\n{}\n```", sql.trim()),
            ),
        ];
        // RunningExplain is only reachable from AnalyzingSchema.
        let mut analyzing_schema = true;

        for turn in 1..=self.max_turns {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            tracing::debug!(turn, model = %self.model, "Requesting model turn");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                r = self.llm.chat_completion(&self.model, &messages, Some(&tool_schemas)) => {
                    r.map_err(|e| AnalysisError::Llm(format!("{:#}", e)))?
                }
            };

            let mut texts = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            for item in response.output_items() {
                match item {
                    OutputItem::Text(text) => texts.push(text),
                    OutputItem::ToolCall(call) => calls.push(call),
                }
            }
            let text = texts.join("\n\n");

            if calls.is_empty() {
                if text.trim().is_empty() {
                    return Err(AnalysisError::EmptyAnswer);
                }
                tracing::debug!(turn, chars = text.len(), "Model returned final answer");
                return Ok(text);
            }

            let content = (!text.is_empty()).then_some(text);
            messages.push(ChatMessage::assistant_with_tools(content, calls.clone()));

            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(AnalysisError::Cancelled);
                }
                let output = self
                    .execute_call(call, progress, cancel, &mut analyzing_schema)
                    .await?;
                tracing::debug!(
                    tool = %call.function.name,
                    call_id = %call.id,
                    preview = %output.preview(),
                    "Tool call finished"
                );
                messages.push(ChatMessage::tool_result(&call.id, output.to_model_string()));
            }

            progress.update_status(StatusUpdate::Generating { turn }).await?;
            analyzing_schema = false;
        }

        Err(AnalysisError::TurnLimitExceeded(self.max_turns))
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        analyzing_schema: &mut bool,
    ) -> Result<ToolOutput, AnalysisError> {
        let name = call.function.name.as_str();
        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %name, call_id = %call.id, "Malformed tool arguments: {}", e);
                return Ok(ToolOutput::error(format!(
                    "Invalid arguments for tool {}: {}",
                    name, e
                )));
            }
        };

        let subquery = self.tools.get(name).and_then(|tool| tool.subquery(&args));
        if let Some(query) = &subquery {
            if *analyzing_schema && is_explain(query) {
                progress.update_status(StatusUpdate::RunningExplain).await?;
            }
            *analyzing_schema = false;
            progress.record_subquery(query, &clock_timestamp()).await?;
        }

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            out = self.tools.execute(name, args) => out,
        };

        if subquery.is_some() {
            progress.record_result(&output.preview()).await?;
        }
        Ok(output)
    }
}

/// Arguments must be a JSON object; an empty payload counts as `{}`.
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

fn is_explain(query: &str) -> bool {
    query
        .split_whitespace()
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("EXPLAIN"))
}

fn clock_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
