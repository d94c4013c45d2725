//! Model Transport Strategy
//!
//! Defines a common interface for model backends (Anthropic, Ollama, ...).
//! The loop works exclusively through [`LlmProvider`]; which backend is used
//! is decided once by whoever constructs the loop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::LlmProvider;
//!
//! let provider = AnthropicProvider::from_env()?;
//! let completion = provider.complete(&messages, "Be brief.", &tools, 1024).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::{ContentBlock, Message};
use crate::tool::{ToolInvocation, ToolSchema};

/// One block of a model response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    ToolUse(ToolInvocation),
}

impl From<ResponseBlock> for ContentBlock {
    fn from(block: ResponseBlock) -> Self {
        match block {
            ResponseBlock::Text { text } => Self::Text { text },
            ResponseBlock::ToolUse(call) => Self::ToolUse(call),
        }
    }
}

/// Why the model stopped generating
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSignal {
    /// Natural stop: the model produced its answer
    EndTurn,
    /// The model is waiting for tool results
    ToolUse,
    /// Per-call token budget exhausted
    MaxTokens,
    /// A stop sequence was hit
    StopSequence,
    /// Any other provider-specific reason
    Other(String),
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => write!(f, "end_turn"),
            Self::ToolUse => write!(f, "tool_use"),
            Self::MaxTokens => write!(f, "max_tokens"),
            Self::StopSequence => write!(f, "stop_sequence"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Token usage as reported by the transport.
///
/// Counts are telemetry: absent or negative values are tolerated here and
/// treated as zero when accumulated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: Option<i64>,
    #[serde(default)]
    pub output_tokens: Option<i64>,
}

impl TokenUsage {
    pub const fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
        }
    }
}

/// Response from one model call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// Content blocks in emission order
    pub blocks: Vec<ResponseBlock>,

    /// Stop indicator
    pub stop: StopSignal,

    /// Token usage statistics
    #[serde(default)]
    pub usage: TokenUsage,

    /// Model that generated this response
    pub model: String,

    /// Provider payload as received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Completion {
    /// Concatenation of every text block
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::ToolUse(_) => None,
            })
            .collect()
    }

    /// Requested tool invocations in emission order
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::ToolUse(call) => Some(call.clone()),
                ResponseBlock::Text { .. } => None,
            })
            .collect()
    }

    /// Whether the model finished without needing tools
    pub fn is_natural_stop(&self) -> bool {
        self.stop == StopSignal::EndTurn
    }
}

/// Strategy trait for model transports
///
/// Implement this trait to add support for new model backends. A transport
/// is stateless per call; retries, if any, happen inside it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs (e.g., "anthropic")
    fn name(&self) -> &str;

    /// Run one model call
    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Completion, TransportError>;

    /// Check if the provider is reachable and configured correctly
    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}
