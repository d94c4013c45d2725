//! # agent-core
//!
//! Tool-use conversation loop with a provider-agnostic model transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ToolLoop                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐   │
//! │  │ Conversation │──▶│ LlmProvider  │──▶│  ToolExecutor   │   │
//! │  │  (history)   │◀──│  (Strategy)  │   │  (capability)   │   │
//! │  └──────────────┘   └──────────────┘   └─────────────────┘   │
//! │          │                                                   │
//! │          ▼                                                   │
//! │   UsageTotals ──▶ LoopResponse            LoopObserver       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets the loop run against Anthropic, Ollama, or
//! any other backend; the `ToolExecutor` trait lets tools run as local
//! functions, subprocesses, or remote calls.

pub mod config;
pub mod error;
pub mod message;
pub mod observer;
pub mod provider;
pub mod tool;
pub mod tool_loop;
pub mod usage;

pub use config::{DispatchMode, LoopConfig};
pub use error::{AgentError, Result, TransportError};
pub use message::{ContentBlock, Conversation, Message, MessageContent, Role};
pub use observer::{LoopObserver, NoopObserver, TracingObserver};
pub use provider::{Completion, LlmProvider, ResponseBlock, StopSignal, TokenUsage};
pub use tool::{ParameterSchema, ToolExecutor, ToolInvocation, ToolResult, ToolSchema};
pub use tool_loop::{LoopResponse, StopReason, ToolLoop, ToolLoopBuilder, run_with_tools};
pub use usage::UsageTotals;
