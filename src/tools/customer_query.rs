//! Read-only diagnostic query tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolOutput};
use crate::customer_db::{ensure_read_only, QueryRunner};

pub const RUN_CUSTOMER_QUERY: &str = "run_customer_query";

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
}

/// Executes a read-only SQL query against the customer's database.
pub struct RunCustomerQuery {
    runner: Arc<dyn QueryRunner>,
}

impl RunCustomerQuery {
    pub fn new(runner: Arc<dyn QueryRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for RunCustomerQuery {
    fn name(&self) -> &str {
        RUN_CUSTOMER_QUERY
    }

    fn description(&self) -> &str {
        "Execute a read-only SQL query against the customer's Yugabyte database."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A SQL SELECT query."
                }
            },
            "required": ["query"]
        })
    }

    fn subquery(&self, args: &Value) -> Option<String> {
        args.get("query")
            .and_then(|q| q.as_str())
            .map(|q| q.trim().to_string())
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let args: QueryArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => {
                return ToolOutput::error(format!(
                    "Invalid arguments for tool {}: {}",
                    RUN_CUSTOMER_QUERY, e
                ))
            }
        };

        if let Err(e) = ensure_read_only(&args.query) {
            return ToolOutput::error(e.to_string());
        }

        match self.runner.run(&args.query).await {
            // A single scalar (SHOW, EXPLAIN ... FORMAT JSON) reads better as text.
            Ok(rows) if rows.len() == 1 && rows[0].len() == 1 => {
                match rows[0].values().next() {
                    Some(Value::String(s)) => ToolOutput::Text(s.clone()),
                    Some(Value::Null) | None => ToolOutput::Rows(rows),
                    Some(other) => ToolOutput::Text(other.to_string()),
                }
            }
            Ok(rows) => ToolOutput::Rows(rows),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}
