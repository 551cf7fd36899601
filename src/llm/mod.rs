//! Reasoning-service client module.
//!
//! This module provides a trait-based abstraction over chat-completion
//! providers that support function calling, with an OpenAI-compatible HTTP
//! client as the production implementation.

mod error;
mod openai;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a simple text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool calls (content may be empty).
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Result of a tool call, correlated by the originating call id.
    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Tool,
            content: Some(output.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function call details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string, untrusted. May be empty or missing.
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition for the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition with schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// One output item of a model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    /// Free-form text or reasoning.
    Text(String),
    /// Structured request to run a tool.
    ToolCall(ToolCall),
}

impl ChatResponse {
    /// Text response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        ChatResponse {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Response requesting the given tool calls.
    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        ChatResponse {
            tool_calls: Some(tool_calls),
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        }
    }

    /// Flatten the response into ordered output items: text first, then tool
    /// calls in the order the model emitted them.
    pub fn output_items(&self) -> Vec<OutputItem> {
        let mut items = Vec::new();
        if let Some(text) = self.content.as_ref().filter(|t| !t.trim().is_empty()) {
            items.push(OutputItem::Text(text.clone()));
        }
        if let Some(calls) = &self.tool_calls {
            items.extend(calls.iter().cloned().map(OutputItem::ToolCall));
        }
        items
    }
}

/// Token usage information (if provided by the upstream provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Optional parameters for chat completions.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
}

/// Trait for reasoning-service clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse>;

    /// Send a chat completion request with optional parameters.
    ///
    /// Default implementation ignores options and calls `chat_completion`.
    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        _options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion(model, messages, tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_items_keep_emission_order() {
        let response = ChatResponse {
            content: Some("checking indexes".to_string()),
            tool_calls: Some(vec![
                ToolCall::function("a", "run_customer_query", "{}"),
                ToolCall::function("b", "run_customer_query", "{}"),
            ]),
            ..Default::default()
        };
        let items = response.output_items();
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], OutputItem::Text(t) if t == "checking indexes"));
        assert!(matches!(&items[1], OutputItem::ToolCall(c) if c.id == "a"));
        assert!(matches!(&items[2], OutputItem::ToolCall(c) if c.id == "b"));
    }

    #[test]
    fn blank_content_is_not_an_item() {
        let response = ChatResponse {
            content: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(response.output_items().is_empty());
    }

    #[test]
    fn tool_call_deserializes_without_type() {
        let call: ToolCall = serde_json::from_str(
            r#"{"id":"call_1","function":{"name":"run_customer_query"}}"#,
        )
        .unwrap();
        assert_eq!(call.call_type, "function");
        assert_eq!(call.function.arguments, "");
    }

    #[test]
    fn tool_result_message_serializes_call_id() {
        let msg = ChatMessage::tool_result("call_9", "[]");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_9");
        assert!(json.get("tool_calls").is_none());
    }
}
