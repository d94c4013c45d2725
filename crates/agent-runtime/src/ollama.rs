//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference through the
//! `/api/chat` endpoint with native tool calling.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result, TransportError},
    message::{ContentBlock, Message, MessageContent, Role},
    provider::{Completion, LlmProvider, ResponseBlock, StopSignal, TokenUsage},
    tool::{ToolInvocation, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::{request_error, status_error};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Model to run
    pub model: String,

    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.2".into(),
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".into());

        Self {
            host,
            port,
            model,
            ..Default::default()
        }
    }

    fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    /// Convert history to Ollama chat messages
    fn convert_messages(messages: &[Message], system_prompt: &str) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(json!({ "role": "system", "content": system_prompt }));
        }

        for m in messages {
            match (m.role, &m.content) {
                (Role::ToolResult, MessageContent::Blocks(_)) => {
                    // Ollama takes one tool message per result
                    wire.extend(
                        m.content
                            .tool_results()
                            .map(|r| json!({ "role": "tool", "content": r.content })),
                    );
                }
                (Role::Assistant, MessageContent::Blocks(blocks)) => {
                    let tool_calls: Vec<Value> = blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolUse(call) => Some(json!({
                                "function": { "name": call.name, "arguments": call.input }
                            })),
                            _ => None,
                        })
                        .collect();
                    let mut message = json!({ "role": "assistant", "content": m.text() });
                    if !tool_calls.is_empty() {
                        message["tool_calls"] = Value::Array(tool_calls);
                    }
                    wire.push(message);
                }
                (role, _) => {
                    let role = match role {
                        Role::System => "system",
                        Role::Assistant => "assistant",
                        Role::ToolResult => "tool",
                        Role::User => "user",
                    };
                    wire.push(json!({ "role": role, "content": m.text() }));
                }
            }
        }

        wire
    }

    /// Convert tool schemas to Ollama function definitions
    fn convert_tools(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema(),
                    }
                })
            })
            .collect()
    }

    /// Convert an Ollama chat response to a completion
    fn convert_completion(raw: Value) -> std::result::Result<Completion, TransportError> {
        let response: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let mut blocks = Vec::new();
        if !response.message.content.is_empty() {
            blocks.push(ResponseBlock::Text {
                text: response.message.content,
            });
        }
        let has_tools = !response.message.tool_calls.is_empty();
        blocks.extend(response.message.tool_calls.into_iter().map(|call| {
            // Ollama does not assign call ids
            let id = format!("call_{}", uuid::Uuid::new_v4().simple());
            ResponseBlock::ToolUse(ToolInvocation::new(id, call.function.name, call.function.arguments))
        }));

        let stop = if has_tools {
            StopSignal::ToolUse
        } else {
            match response.done_reason.as_deref() {
                None | Some("stop") => StopSignal::EndTurn,
                Some("length") => StopSignal::MaxTokens,
                Some(other) => StopSignal::Other(other.to_string()),
            }
        };

        Ok(Completion {
            blocks,
            stop,
            usage: TokenUsage {
                input_tokens: response.prompt_eval_count,
                output_tokens: response.eval_count,
            },
            model: response.model,
            raw: Some(raw),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    message: ChatMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> std::result::Result<Completion, TransportError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": Self::convert_messages(messages, system_prompt),
            "stream": false,
            "options": { "num_predict": max_tokens },
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(tools));
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| request_error(&e))?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), text));
        }

        let raw: Value =
            serde_json::from_str(&text).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Self::convert_completion(raw)
    }

    async fn health_check(&self) -> std::result::Result<bool, TransportError> {
        match self
            .client
            .get(format!("{}/api/tags", self.config.base_url()))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
