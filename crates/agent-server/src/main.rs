//! tool-loop HTTP Server
//!
//! Axum-based server that runs the tool-use loop on behalf of callers.
//! Tools are executed by a remote endpoint configured with
//! `TOOL_EXECUTOR_URL`.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{LlmProvider, LoopConfig, ToolExecutor, ToolInvocation, ToolResult};
use agent_runtime::{
    AnthropicProvider, HttpToolExecutor, OllamaProvider, RetryPolicy, RetryingProvider,
};

use crate::handlers::{health_check, run_handler};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let provider = build_provider()?;

    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to {}", provider.name()),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not reachable - runs will fail", provider.name());
        }
    }

    let executor: Arc<dyn ToolExecutor> = match std::env::var("TOOL_EXECUTOR_URL") {
        Ok(url) => {
            tracing::info!("Tools execute at {}", url);
            Arc::new(HttpToolExecutor::new(url, Duration::from_secs(60))?)
        }
        Err(_) => {
            tracing::warn!("⚠ TOOL_EXECUTOR_URL not set - every tool call will fail");
            Arc::new(|call: &ToolInvocation| {
                ToolResult::failure(&call.id, format!("No executor configured for '{}'", call.name))
            })
        }
    };

    let config = LoopConfig::from_env();
    tracing::info!(
        max_iterations = config.max_iterations,
        max_tokens = config.max_tokens,
        dispatch = ?config.dispatch,
        "Loop configured"
    );

    let state = AppState {
        provider,
        executor,
        config,
    };

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("tool-loop server running on http://{}", addr);
    tracing::info!("  GET  /health   - Health check");
    tracing::info!("  POST /api/run  - Run the tool loop");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Pick the model transport once, from `AGENT_PROVIDER`
fn build_provider() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let name = std::env::var("AGENT_PROVIDER").unwrap_or_else(|_| "anthropic".into());
    let inner: Arc<dyn LlmProvider> = match name.as_str() {
        "anthropic" => Arc::new(AnthropicProvider::from_env()?),
        "ollama" => Arc::new(OllamaProvider::from_env()?),
        other => anyhow::bail!("unknown AGENT_PROVIDER: {other}"),
    };

    let max_retries = std::env::var("PROVIDER_MAX_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    if max_retries == 0 {
        return Ok(inner);
    }

    Ok(Arc::new(RetryingProvider::new(
        inner,
        RetryPolicy {
            max_retries,
            ..Default::default()
        },
    )))
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/run", post(run_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
