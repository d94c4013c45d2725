//! Application State

use std::sync::Arc;

use agent_core::{LlmProvider, LoopConfig, ToolExecutor};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Model transport, chosen once at startup
    pub provider: Arc<dyn LlmProvider>,

    /// Executes the tools the model requests
    pub executor: Arc<dyn ToolExecutor>,

    /// Loop defaults; requests may lower `max_iterations`
    pub config: LoopConfig,
}
