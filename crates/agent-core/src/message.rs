//! Conversation Messages
//!
//! The history passed to every model call. Content is either plain text or
//! an ordered list of [`ContentBlock`]s, so an assistant turn keeps its text
//! and tool invocations in the order the model emitted them.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::{ToolInvocation, ToolResult};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (model) response
    Assistant,
    /// Results of the tools requested by the preceding assistant turn
    ToolResult,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// One block of structured message content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolInvocation),
    ToolResult(ToolResult),
}

/// Message body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenation of every text block
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Tool invocations in emission order
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse(call) => Some(call),
            _ => None,
        })
    }

    /// Tool results in order
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Text(_) => &[],
            Self::Blocks(blocks) => blocks,
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text or structured content
    pub content: MessageContent,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    /// Create a plain-text assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Create an assistant message from ordered blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, MessageContent::Blocks(blocks))
    }

    /// Create a tool-result turn carrying one batch of results
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        let blocks = results.into_iter().map(ContentBlock::ToolResult).collect();
        Self::new(Role::ToolResult, MessageContent::Blocks(blocks))
    }

    /// Text content of the message
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Ordered, append-only conversation history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume into the underlying messages
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Check the history is non-empty and every assistant turn that requests
    /// tools is immediately followed by a tool-result turn answering each of
    /// its invocation ids.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(AgentError::InvalidInput("history must not be empty".into()));
        }

        for (idx, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Assistant => {
                    let pending: HashSet<&str> = message
                        .content
                        .tool_invocations()
                        .map(|call| call.id.as_str())
                        .collect();
                    if pending.is_empty() {
                        continue;
                    }

                    let next = self.messages.get(idx + 1).filter(|m| m.role == Role::ToolResult);
                    let Some(next) = next else {
                        return Err(AgentError::InvalidInput(format!(
                            "assistant turn {idx} requests tools but is not followed by a tool_result turn"
                        )));
                    };

                    let answered: HashSet<&str> = next
                        .content
                        .tool_results()
                        .map(|result| result.invocation_id.as_str())
                        .collect();
                    if let Some(missing) = pending.difference(&answered).next() {
                        return Err(AgentError::InvalidInput(format!(
                            "invocation '{missing}' in turn {idx} has no matching tool result"
                        )));
                    }
                }
                Role::ToolResult => {
                    let follows_assistant = idx
                        .checked_sub(1)
                        .and_then(|prev| self.messages.get(prev))
                        .is_some_and(|m| m.role == Role::Assistant);
                    if !follows_assistant {
                        return Err(AgentError::InvalidInput(format!(
                            "tool_result turn {idx} does not follow an assistant turn"
                        )));
                    }
                }
                Role::System | Role::User => {}
            }
        }

        Ok(())
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
