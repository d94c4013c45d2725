//! Loop Observation
//!
//! The loop reports progress only through a [`LoopObserver`] handed to it at
//! construction. Every method has an empty default, so an observer only
//! implements the points it cares about.

use crate::error::AgentError;
use crate::provider::Completion;
use crate::tool::{ToolInvocation, ToolResult};
use crate::tool_loop::LoopResponse;

/// Callbacks invoked at fixed points of a run
pub trait LoopObserver: Send + Sync {
    /// Before each model call (iterations are 1-based)
    fn on_iteration_start(&self, _iteration: usize, _max_iterations: usize) {}

    /// After a model call returned
    fn on_model_response(&self, _iteration: usize, _completion: &Completion) {}

    /// Before a tool invocation is handed to the executor
    fn on_tool_dispatch(&self, _iteration: usize, _invocation: &ToolInvocation) {}

    /// After the executor answered (placeholder already applied)
    fn on_tool_result(&self, _iteration: usize, _result: &ToolResult) {}

    /// The run produced a response
    fn on_finish(&self, _response: &LoopResponse) {}

    /// The run aborted with an error
    fn on_abort(&self, _error: &AgentError) {}
}

/// Observer that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl LoopObserver for NoopObserver {}

/// Observer that emits structured `tracing` events
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl LoopObserver for TracingObserver {
    fn on_iteration_start(&self, iteration: usize, max_iterations: usize) {
        tracing::debug!(iteration, max_iterations, "Calling model");
    }

    fn on_model_response(&self, iteration: usize, completion: &Completion) {
        tracing::debug!(
            iteration,
            model = %completion.model,
            stop = %completion.stop,
            blocks = completion.blocks.len(),
            "Model responded"
        );
    }

    fn on_tool_dispatch(&self, iteration: usize, invocation: &ToolInvocation) {
        tracing::debug!(iteration, tool = %invocation.name, id = %invocation.id, "Executing tool");
    }

    fn on_tool_result(&self, iteration: usize, result: &ToolResult) {
        if result.is_error {
            tracing::warn!(iteration, id = %result.invocation_id, "Tool returned an error");
        }
    }

    fn on_finish(&self, response: &LoopResponse) {
        tracing::info!(
            stop_reason = %response.stop_reason,
            model = %response.model_id,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Tool loop finished"
        );
    }

    fn on_abort(&self, error: &AgentError) {
        tracing::warn!(error = %error, "Tool loop aborted");
    }
}
