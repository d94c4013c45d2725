//! # agent-runtime
//!
//! Model transports and tool executors for the tool-use loop.
//!
//! ## Providers
//!
//! - **Anthropic** (default): Messages API with native tool use
//! - **Ollama** (default): local inference via `/api/chat`
//!
//! Any provider can be wrapped in [`RetryingProvider`] to retry transient
//! failures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::AnthropicProvider;
//!
//! let provider = Arc::new(AnthropicProvider::from_env()?);
//! let tool_loop = ToolLoopBuilder::new().provider(provider).build()?;
//! let response = tool_loop.run(&mut history, "Be brief.", &tools, &executor).await?;
//! ```

mod http;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "ollama")]
pub mod ollama;

pub mod http_executor;
pub mod retry;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

pub use http_executor::HttpToolExecutor;
pub use retry::{RetryPolicy, RetryingProvider};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, Conversation, LlmProvider, LoopConfig, LoopResponse, Message, Result, Role,
    ToolExecutor, ToolLoop, ToolLoopBuilder, ToolSchema,
};
