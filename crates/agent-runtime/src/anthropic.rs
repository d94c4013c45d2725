//! Anthropic Messages API Provider
//!
//! Implementation of `LlmProvider` over `POST /v1/messages`.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result, TransportError},
    message::{Message, MessageContent, Role},
    provider::{Completion, LlmProvider, ResponseBlock, StopSignal, TokenUsage},
    tool::{ToolInvocation, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::{request_error, status_error};

const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 120,
        }
    }
}

impl AnthropicConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        Ok(Self {
            api_key,
            model,
            base_url,
            ..Default::default()
        })
    }
}

/// Anthropic model transport
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a provider for the given key and model
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::from_config(AnthropicConfig {
            api_key: api_key.into(),
            model: model.into(),
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: AnthropicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(AnthropicConfig::from_env()?)
    }

    /// Build the request body
    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> Value {
        let (wire_messages, extra_system) = Self::convert_messages(messages);

        let mut system = system_prompt.to_string();
        for text in extra_system {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&text);
        }

        let mut body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": wire_messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema(),
                    })
                })
                .collect();
        }
        body
    }

    /// Convert history to API messages. System turns are not allowed in the
    /// message list, so their text is returned separately.
    fn convert_messages(messages: &[Message]) -> (Vec<Value>, Vec<String>) {
        let mut wire = Vec::with_capacity(messages.len());
        let mut system = Vec::new();

        for m in messages {
            let role = match m.role {
                Role::System => {
                    system.push(m.text());
                    continue;
                }
                Role::User | Role::ToolResult => "user",
                Role::Assistant => "assistant",
            };
            let content = match &m.content {
                MessageContent::Text(text) => Value::String(text.clone()),
                MessageContent::Blocks(blocks) => json!(blocks),
            };
            wire.push(json!({ "role": role, "content": content }));
        }

        (wire, system)
    }

    /// Convert an API response body to a completion
    fn convert_response(raw: Value) -> std::result::Result<Completion, TransportError> {
        let response: MessagesResponse = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let blocks: Vec<ResponseBlock> = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ResponseBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => {
                    Some(ResponseBlock::ToolUse(ToolInvocation::new(id, name, input)))
                }
                WireBlock::Unsupported => None,
            })
            .collect();

        let has_tools = blocks.iter().any(|b| matches!(b, ResponseBlock::ToolUse(_)));
        let stop = match response.stop_reason.as_deref() {
            Some("end_turn") => StopSignal::EndTurn,
            Some("tool_use") => StopSignal::ToolUse,
            Some("max_tokens") => StopSignal::MaxTokens,
            Some("stop_sequence") => StopSignal::StopSequence,
            Some(other) => StopSignal::Other(other.to_string()),
            None if has_tools => StopSignal::ToolUse,
            None => StopSignal::EndTurn,
        };

        Ok(Completion {
            blocks,
            stop,
            usage: response.usage,
            model: response.model,
            raw: Some(raw),
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> std::result::Result<Completion, TransportError> {
        let body = self.build_request(messages, system_prompt, tools, max_tokens);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        tracing::debug!(model = %self.config.model, messages = messages.len(), "Sending Anthropic request");

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
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
        Self::convert_response(raw)
    }
}
