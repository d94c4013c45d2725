//! Remote Tool Executor
//!
//! Posts each invocation as JSON to a fixed endpoint and reads back
//! `{"content": "...", "is_error": false}`. Every failure along the way is
//! turned into an error result for the model to see.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    tool::{ToolExecutor, ToolInvocation, ToolResult},
};
use async_trait::async_trait;
use serde::Deserialize;

/// Reply expected from the tool endpoint
#[derive(Debug, Deserialize)]
struct ToolReply {
    #[serde(default)]
    content: String,
    #[serde(default)]
    is_error: bool,
}

/// Executes tools by calling an HTTP endpoint
pub struct HttpToolExecutor {
    client: reqwest::Client,
    url: String,
}

impl HttpToolExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, invocation: &ToolInvocation) -> std::result::Result<ToolReply, String> {
        let response = self
            .client
            .post(&self.url)
            .json(invocation)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("endpoint returned {status}: {body}"));
        }

        response
            .json::<ToolReply>()
            .await
            .map_err(|e| format!("invalid reply: {e}"))
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        match self.call(invocation).await {
            Ok(reply) => ToolResult {
                invocation_id: invocation.id.clone(),
                content: reply.content,
                is_error: reply.is_error,
            },
            Err(e) => {
                tracing::warn!(tool = %invocation.name, error = %e, "Remote tool call failed");
                ToolResult::failure(&invocation.id, format!("Tool '{}' failed: {e}", invocation.name))
            }
        }
    }
}
