//! Single-shot SQL rewrite.
//!
//! One request to the reasoning service, no tools. The model answers with
//! the rewrite and an explanation wrapped in XML-style tags.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::llm::{ChatMessage, ChatOptions, LlmClient, Role};

const REWRITE_INSTRUCTION: &str = "\
You are a senior database performance engineer.

Rewrite the user's SQL so it is functionally equivalent but more performant.

Return the result wrapped in exactly the following XML tags (and nothing else):

<optimized_query>
...optimized SQL here...
</optimized_query>
<explanation>
...concise explanation of the changes here...
</explanation>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Rewrite {
    pub optimized_query: String,
    pub explanation: String,
}

pub struct Optimizer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Optimizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Ask the model for a faster equivalent of `sql`. Model failures are
    /// returned to the caller; missing tags yield empty fields.
    pub async fn optimize(&self, sql: &str) -> anyhow::Result<Rewrite> {
        tracing::info!(model = %self.model, "Optimizing query");
        let messages = [
            ChatMessage::new(Role::System, REWRITE_INSTRUCTION),
            ChatMessage::new(Role::User, sql),
        ];
        let options = ChatOptions {
            temperature: Some(0.1),
            max_tokens: None,
        };
        let response = self
            .llm
            .chat_completion_with_options(&self.model, &messages, None, options)
            .await?;
        Ok(parse_rewrite(response.content.as_deref().unwrap_or_default()))
    }
}

/// Extract the tagged sections from a model reply.
pub fn parse_rewrite(content: &str) -> Rewrite {
    Rewrite {
        optimized_query: extract_tag(content, "optimized_query"),
        explanation: extract_tag(content, "explanation"),
    }
}

fn extract_tag(content: &str, tag: &str) -> String {
    let pattern = format!(r"(?is)<{tag}>(.*?)</{tag}>");
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}
