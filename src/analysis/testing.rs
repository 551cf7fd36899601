//! Scripted collaborators for orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::session::SessionStore;
use super::types::AnalysisTask;
use crate::customer_db::{QueryError, QueryRunner, Row};
use crate::llm::{ChatMessage, ChatResponse, LlmClient, ToolCall, ToolDefinition};

pub enum Step {
    Reply(ChatResponse),
    Fail(String),
    /// Never answers; only cancellation gets the task out.
    Hang,
}

pub fn query_call(id: &str, query: &str) -> ToolCall {
    ToolCall::function(
        id,
        "run_customer_query",
        json!({ "query": query }).to_string(),
    )
}

pub fn tool_turn(calls: Vec<ToolCall>) -> Step {
    Step::Reply(ChatResponse::with_tool_calls(calls))
}

pub fn final_text(text: &str) -> Step {
    Step::Reply(ChatResponse::text(text))
}

/// Reasoning service that replays a script per analyzed statement. The
/// statement is matched by a marker substring of the first user message.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<Vec<(String, VecDeque<Step>)>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, marker: &str, steps: Vec<Step>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push((marker.to_string(), steps.into()));
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, messages: &[ChatMessage]) -> Step {
        let user = messages
            .iter()
            .find(|m| m.role == crate::llm::Role::User)
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|(marker, _)| user.contains(marker.as_str()))
            .and_then(|(_, steps)| steps.pop_front())
            .unwrap_or_else(|| final_text("Create an index on the filtered column."))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let step = self.next_step(messages);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Reply(response) => Ok(response),
            Step::Fail(message) => Err(anyhow::anyhow!(message)),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Customer database stand-in. EXPLAIN returns a single plan value,
/// anything mentioning `missing_table` fails, the rest returns two rows.
#[derive(Default)]
pub struct FakeRunner {
    executed: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryRunner for FakeRunner {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        self.executed.lock().unwrap().push(sql.to_string());
        if sql.contains("missing_table") {
            return Err(QueryError::Database(
                "relation \"missing_table\" does not exist".to_string(),
            ));
        }
        let row = |k: &str, v: serde_json::Value| {
            let mut r = Row::new();
            r.insert(k.to_string(), v);
            r
        };
        if sql.trim_start().to_uppercase().starts_with("EXPLAIN") {
            return Ok(vec![row("QUERY PLAN", json!("Seq Scan on orders  (cost=0.00..35.50 rows=2550 width=4)"))]);
        }
        Ok(vec![row("n", json!(1)), row("n", json!(2))])
    }
}

/// Poll until every task in the session is terminal.
pub async fn wait_for_terminal(store: &SessionStore, session_id: &str) -> Vec<AnalysisTask> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = store.list_tasks(session_id).await.unwrap();
        if tasks.iter().all(|t| t.is_terminal()) {
            return tasks;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tasks never finished: {tasks:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
