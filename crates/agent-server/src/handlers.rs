//! HTTP Handlers

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use agent_core::{AgentError, Conversation, LoopResponse, Message, ToolLoop, ToolSchema};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    #[serde(flatten)]
    pub response: LoopResponse,
    /// History after the run, ready to send back for the next turn
    pub messages: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: &AgentError) -> ApiError {
    let (status, code) = match err {
        AgentError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        AgentError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        AgentError::Cancelled { .. } | AgentError::Timeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    };

    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.name().to_string(),
        provider_connected,
    })
}

/// Run the tool loop over the supplied history
pub async fn run_handler(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    // Requests may lower the bound, never raise it
    let mut config = state.config.clone();
    if let Some(max) = payload.max_iterations {
        config.max_iterations = max.min(state.config.max_iterations);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut history = Conversation::from(payload.messages);
    tracing::info!(%run_id, messages = history.len(), tools = payload.tools.len(), "Starting run");

    let tool_loop = ToolLoop::new(state.provider.clone(), config);
    let response = tool_loop
        .run(
            &mut history,
            &payload.system_prompt,
            &payload.tools,
            state.executor.as_ref(),
        )
        .await
        .map_err(|e| {
            tracing::error!(%run_id, "Run failed: {}", e);
            error_response(&e)
        })?;

    Ok(Json(RunResponse {
        run_id,
        response,
        messages: history,
    }))
}
