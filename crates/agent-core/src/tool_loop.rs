//! Tool-Use Loop
//!
//! Drives a model through repeated call → tool dispatch → call cycles until
//! it answers without requesting tools or the iteration bound is reached.
//!
//! Each iteration is staged: the assistant turn and its tool results are only
//! appended to the caller's history once the whole iteration has completed,
//! so a timeout or cancellation never leaves half an iteration behind.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_MAX_ITERATIONS, DispatchMode, LoopConfig};
use crate::error::{AgentError, Result};
use crate::message::{ContentBlock, Conversation, Message};
use crate::observer::{LoopObserver, TracingObserver};
use crate::provider::{Completion, LlmProvider};
use crate::tool::{ToolExecutor, ToolInvocation, ToolResult, ToolSchema};
use crate::usage::UsageTotals;

/// Why a run ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools
    Completed,
    /// The iteration bound was exhausted
    MaxIterationsReached,
    /// The transport stopped for another reason (e.g. `max_tokens`)
    Provider(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::MaxIterationsReached => write!(f, "max_iterations_reached"),
            Self::Provider(reason) => write!(f, "{reason}"),
        }
    }
}

/// Outcome of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopResponse {
    /// Final text (the bound sentinel when iterations ran out)
    pub content: String,

    /// Model that produced the last response
    pub model_id: String,

    /// Input tokens summed over every model call of the run
    pub input_tokens: u64,

    /// Output tokens summed over every model call of the run
    pub output_tokens: u64,

    pub stop_reason: StopReason,

    /// Last transport payload, if the run ended on a model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,

    /// Number of model calls made
    pub iterations: usize,
}

/// Result of one staged iteration
enum Step {
    Finished(Completion),
    Continue { assistant: Message, results: Message },
}

/// The tool-use loop
pub struct ToolLoop {
    provider: Arc<dyn LlmProvider>,
    config: LoopConfig,
    observer: Arc<dyn LoopObserver>,
}

impl ToolLoop {
    /// Create a new loop
    pub fn new(provider: Arc<dyn LlmProvider>, config: LoopConfig) -> Self {
        Self {
            provider,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider, LoopConfig::default())
    }

    /// Replace the observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get configuration
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run until the model answers or the iteration bound is reached.
    ///
    /// `history` is extended in place with every completed iteration and,
    /// on a natural stop, the final assistant answer.
    pub async fn run(
        &self,
        history: &mut Conversation,
        system_prompt: &str,
        tools: &[ToolSchema],
        executor: &dyn ToolExecutor,
    ) -> Result<LoopResponse> {
        self.run_until_cancelled(history, system_prompt, tools, executor, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), aborting with [`AgentError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn run_until_cancelled(
        &self,
        history: &mut Conversation,
        system_prompt: &str,
        tools: &[ToolSchema],
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<LoopResponse> {
        let outcome = self
            .drive(history, system_prompt, tools, executor, cancel)
            .await;

        match &outcome {
            Ok(response) => self.observer.on_finish(response),
            Err(e) => self.observer.on_abort(e),
        }
        outcome
    }

    /// Single model call without tools.
    pub async fn complete_once(
        &self,
        history: &Conversation,
        system_prompt: &str,
    ) -> Result<LoopResponse> {
        history.validate()?;

        let completion = self
            .provider
            .complete(history.messages(), system_prompt, &[], self.config.max_tokens)
            .await?;
        self.observer.on_model_response(1, &completion);

        let mut totals = UsageTotals::new();
        totals.record(&completion.usage);
        Ok(Self::finished(completion, totals, 1))
    }

    async fn drive(
        &self,
        history: &mut Conversation,
        system_prompt: &str,
        tools: &[ToolSchema],
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<LoopResponse> {
        let max_iterations = self.config.max_iterations;
        if max_iterations == 0 {
            return Err(AgentError::InvalidInput("max_iterations must be at least 1".into()));
        }
        history.validate()?;

        let mut totals = UsageTotals::new();
        let mut model_id = String::new();

        for iteration in 1..=max_iterations {
            self.observer.on_iteration_start(iteration, max_iterations);

            let step = self.iteration(
                iteration,
                history.messages(),
                system_prompt,
                tools,
                executor,
                &mut totals,
                &mut model_id,
            );

            let outcome = self.guard(iteration, step, cancel).await?;
            match outcome {
                Step::Finished(completion) => {
                    let text = completion.text();
                    if !text.is_empty() {
                        history.push(Message::assistant(text));
                    }
                    return Ok(Self::finished(completion, totals, iteration));
                }
                Step::Continue { assistant, results } => {
                    history.push(assistant);
                    history.push(results);
                }
            }
        }

        Ok(LoopResponse {
            content: self.config.max_iterations_message.clone(),
            model_id,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            stop_reason: StopReason::MaxIterationsReached,
            raw_response: None,
            iterations: max_iterations,
        })
    }

    /// Bound one iteration by the cancellation token and the configured timeout
    async fn guard(
        &self,
        iteration: usize,
        step: impl Future<Output = Result<Step>>,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let limit = self.config.iteration_timeout;
        let bounded = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, step)
                    .await
                    .unwrap_or_else(|_| Err(AgentError::Timeout { iteration, limit })),
                None => step.await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AgentError::Cancelled { iteration }),
            outcome = bounded => outcome,
        }
    }

    /// One model call plus, if requested, one tool batch. Touches nothing
    /// but the running totals; the caller commits the returned turns.
    #[allow(clippy::too_many_arguments)]
    async fn iteration(
        &self,
        iteration: usize,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        executor: &dyn ToolExecutor,
        totals: &mut UsageTotals,
        model_id: &mut String,
    ) -> Result<Step> {
        let completion = self
            .provider
            .complete(messages, system_prompt, tools, self.config.max_tokens)
            .await?;

        totals.record(&completion.usage);
        model_id.clone_from(&completion.model);
        self.observer.on_model_response(iteration, &completion);

        let invocations = completion.tool_invocations();
        if completion.is_natural_stop() || invocations.is_empty() {
            return Ok(Step::Finished(completion));
        }

        let assistant = Message::assistant_blocks(
            completion.blocks.into_iter().map(ContentBlock::from).collect(),
        );
        let results = self.dispatch(iteration, &invocations, executor).await;

        Ok(Step::Continue {
            assistant,
            results: Message::tool_results(results),
        })
    }

    /// Execute a batch; results come back in emission order either way
    async fn dispatch(
        &self,
        iteration: usize,
        invocations: &[ToolInvocation],
        executor: &dyn ToolExecutor,
    ) -> Vec<ToolResult> {
        match self.config.dispatch {
            DispatchMode::Sequential => {
                let mut results = Vec::with_capacity(invocations.len());
                for call in invocations {
                    results.push(self.execute_tool(iteration, call, executor).await);
                }
                results
            }
            DispatchMode::Concurrent => {
                join_all(
                    invocations
                        .iter()
                        .map(|call| self.execute_tool(iteration, call, executor)),
                )
                .await
            }
        }
    }

    /// Execute one invocation
    async fn execute_tool(
        &self,
        iteration: usize,
        call: &ToolInvocation,
        executor: &dyn ToolExecutor,
    ) -> ToolResult {
        self.observer.on_tool_dispatch(iteration, call);

        let mut result = executor.execute(call).await;
        result.invocation_id.clone_from(&call.id);
        if result.content.is_empty() {
            result.content.clone_from(&self.config.empty_result_placeholder);
        }

        self.observer.on_tool_result(iteration, &result);
        result
    }

    fn finished(completion: Completion, totals: UsageTotals, iterations: usize) -> LoopResponse {
        let stop_reason = if completion.is_natural_stop() {
            StopReason::Completed
        } else {
            StopReason::Provider(completion.stop.to_string())
        };

        LoopResponse {
            content: completion.text(),
            model_id: completion.model,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            stop_reason,
            raw_response: completion.raw,
            iterations,
        }
    }
}

/// Run the loop once with default settings, making at most `max_iterations`
/// model calls ([`DEFAULT_MAX_ITERATIONS`] when `None`).
pub async fn run_with_tools(
    provider: Arc<dyn LlmProvider>,
    history: &mut Conversation,
    system_prompt: &str,
    tools: &[ToolSchema],
    executor: &dyn ToolExecutor,
    max_iterations: Option<usize>,
) -> Result<LoopResponse> {
    let config = LoopConfig {
        max_iterations: max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        ..LoopConfig::default()
    };
    ToolLoop::new(provider, config)
        .run(history, system_prompt, tools, executor)
        .await
}

/// Builder for loop configuration
pub struct ToolLoopBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    observer: Option<Arc<dyn LoopObserver>>,
    config: LoopConfig,
}

impl Default for ToolLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLoopBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            observer: None,
            config: LoopConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.max_tokens = max;
        self
    }

    #[must_use]
    pub const fn iteration_timeout(mut self, limit: std::time::Duration) -> Self {
        self.config.iteration_timeout = Some(limit);
        self
    }

    #[must_use]
    pub const fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    #[must_use]
    pub fn empty_result_placeholder(mut self, text: impl Into<String>) -> Self {
        self.config.empty_result_placeholder = text.into();
        self
    }

    pub fn build(self) -> Result<ToolLoop> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }

        let tool_loop = ToolLoop::new(provider, self.config);
        Ok(match self.observer {
            Some(observer) => tool_loop.with_observer(observer),
            None => tool_loop,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::TransportError;
    use crate::message::{MessageContent, Role};
    use crate::observer::NoopObserver;
    use crate::provider::{ResponseBlock, StopSignal, TokenUsage};

    /// Transport that replays scripted responses and records every request
    struct ScriptedProvider {
        script: Mutex<VecDeque<std::result::Result<Completion, TransportError>>>,
        fallback: Option<Completion>,
        requests: Mutex<Vec<Vec<Message>>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<std::result::Result<Completion, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn repeating(completion: Completion) -> Self {
            let mut provider = Self::new(Vec::new());
            provider.fallback = Some(completion);
            provider
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, n: usize) -> Vec<Message> {
            self.requests.lock().unwrap()[n].clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[Message],
            _system_prompt: &str,
            _tools: &[ToolSchema],
            _max_tokens: u32,
        ) -> std::result::Result<Completion, TransportError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.or_else(|| self.fallback.clone().map(Ok))
                .unwrap_or_else(|| Err(TransportError::Malformed("script exhausted".into())))
        }
    }

    /// Executor that records dispatch order and answers from a fixed table
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
        delays: Vec<(String, Duration)>,
        empty_error: bool,
    }

    #[async_trait]
    impl ToolExecutor for RecordingExecutor {
        async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
            if let Some((_, delay)) = self.delays.iter().find(|(id, _)| *id == invocation.id) {
                tokio::time::sleep(*delay).await;
            }
            self.seen.lock().unwrap().push(invocation.id.clone());
            if self.empty_error {
                ToolResult::failure(&invocation.id, "")
            } else {
                ToolResult::success(&invocation.id, format!("{} ok", invocation.name))
            }
        }
    }

    fn text_reply(text: &str, input: i64, output: i64) -> Completion {
        Completion {
            blocks: vec![ResponseBlock::Text { text: text.into() }],
            stop: StopSignal::EndTurn,
            usage: TokenUsage::new(input, output),
            model: "test-model".into(),
            raw: Some(json!({"id": "msg_final"})),
        }
    }

    fn tool_reply(ids: &[&str], input: i64, output: i64) -> Completion {
        let mut blocks = vec![ResponseBlock::Text {
            text: "Let me look that up.".into(),
        }];
        blocks.extend(
            ids.iter()
                .map(|id| ResponseBlock::ToolUse(ToolInvocation::new(*id, "lookup", json!({"q": id})))),
        );
        Completion {
            blocks,
            stop: StopSignal::ToolUse,
            usage: TokenUsage::new(input, output),
            model: "test-model".into(),
            raw: None,
        }
    }

    fn history() -> Conversation {
        Conversation::from(vec![Message::user("What is the price of BTC?")])
    }

    fn tool_loop(provider: Arc<ScriptedProvider>, max_iterations: usize) -> ToolLoop {
        ToolLoopBuilder::new()
            .provider(provider)
            .observer(Arc::new(NoopObserver))
            .max_iterations(max_iterations)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_natural_stop_on_first_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_reply("Done", 12, 3))]));
        let executor = RecordingExecutor::default();
        let mut conv = history();

        let response = tool_loop(provider.clone(), 10)
            .run(&mut conv, "system", &[], &executor)
            .await
            .unwrap();

        assert_eq!(response.content, "Done");
        assert_eq!(response.stop_reason, StopReason::Completed);
        assert_eq!(response.iterations, 1);
        assert_eq!((response.input_tokens, response.output_tokens), (12, 3));
        assert_eq!(response.raw_response, Some(json!({"id": "msg_final"})));
        assert_eq!(provider.calls(), 1);
        assert!(executor.seen.lock().unwrap().is_empty());
        assert_eq!(conv.last().unwrap().text(), "Done");
    }

    #[tokio::test]
    async fn test_bound_exhaustion_with_lookup_tool() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_reply(&["t1"], 10, 2)));
        let executor = RecordingExecutor::default();
        let mut conv = history();

        let response = tool_loop(provider.clone(), 3)
            .run(&mut conv, "system", &[], &executor)
            .await
            .unwrap();

        assert_eq!(provider.calls(), 3);
        assert_eq!(executor.seen.lock().unwrap().len(), 3);
        assert_eq!(response.stop_reason, StopReason::MaxIterationsReached);
        assert_eq!(response.content, "Max tool iterations reached");
        assert!(response.raw_response.is_none());
        assert_eq!((response.input_tokens, response.output_tokens), (30, 6));
        // user + 3 × (assistant, tool_result)
        assert_eq!(conv.len(), 7);
        assert!(conv.validate().is_ok());
    }

    #[tokio::test]
    async fn test_token_totals_sum_every_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["a"], 100, 20)),
            Ok(tool_reply(&["b"], 140, 25)),
            Ok(text_reply("Final", 180, 40)),
        ]));
        let mut conv = history();

        let response = tool_loop(provider, 10)
            .run(&mut conv, "system", &[], &RecordingExecutor::default())
            .await
            .unwrap();

        assert_eq!(response.input_tokens, 100 + 140 + 180);
        assert_eq!(response.output_tokens, 20 + 25 + 40);
        assert_eq!(response.iterations, 3);
    }

    #[tokio::test]
    async fn test_missing_usage_counts_as_zero() {
        let mut first = tool_reply(&["a"], 0, 0);
        first.usage = TokenUsage {
            input_tokens: None,
            output_tokens: Some(-5),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(first), Ok(text_reply("ok", 7, 1))]));
        let mut conv = history();

        let response = tool_loop(provider, 10)
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await
            .unwrap();

        assert_eq!((response.input_tokens, response.output_tokens), (7, 1));
    }

    #[tokio::test]
    async fn test_empty_error_result_gets_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["t1"], 1, 1)),
            Ok(text_reply("Recovered", 1, 1)),
        ]));
        let executor = RecordingExecutor {
            empty_error: true,
            ..Default::default()
        };
        let mut conv = history();

        tool_loop(provider.clone(), 10)
            .run(&mut conv, "system", &[], &executor)
            .await
            .unwrap();

        let turn = &conv.messages()[2];
        assert_eq!(turn.role, Role::ToolResult);
        let results: Vec<_> = turn.content.tool_results().cloned().collect();
        assert_eq!(results, vec![ToolResult::failure("t1", "(empty result)")]);

        // The second model call sees that turn exactly as committed
        let second = provider.request(1);
        assert_eq!(second.len(), 3);
        assert_eq!(second[2].content, turn.content);
    }

    #[tokio::test]
    async fn test_custom_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["t1"], 1, 1)),
            Ok(text_reply("ok", 1, 1)),
        ]));
        let executor = |call: &ToolInvocation| ToolResult::success(&call.id, "");
        let mut conv = history();

        ToolLoopBuilder::new()
            .provider(provider)
            .observer(Arc::new(NoopObserver))
            .empty_result_placeholder("<no output>")
            .build()
            .unwrap()
            .run(&mut conv, "", &[], &executor)
            .await
            .unwrap();

        let result = conv.messages()[2].content.tool_results().next().cloned().unwrap();
        assert_eq!(result.content, "<no output>");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_assistant_turn_preserves_block_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["a", "b"], 1, 1)),
            Ok(text_reply("ok", 1, 1)),
        ]));
        let mut conv = history();

        tool_loop(provider, 10)
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await
            .unwrap();

        let MessageContent::Blocks(blocks) = &conv.messages()[1].content else {
            panic!("assistant turn should carry blocks");
        };
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Let me look that up."));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse(call) if call.id == "a"));
        assert!(matches!(&blocks[2], ContentBlock::ToolUse(call) if call.id == "b"));
    }

    #[tokio::test]
    async fn test_results_follow_emission_order_despite_latency() {
        for mode in [DispatchMode::Sequential, DispatchMode::Concurrent] {
            let provider = Arc::new(ScriptedProvider::new(vec![
                Ok(tool_reply(&["slow", "fast"], 1, 1)),
                Ok(text_reply("ok", 1, 1)),
            ]));
            let executor = RecordingExecutor {
                delays: vec![("slow".into(), Duration::from_millis(50))],
                ..Default::default()
            };
            let mut conv = history();

            ToolLoopBuilder::new()
                .provider(provider)
                .observer(Arc::new(NoopObserver))
                .dispatch(mode)
                .build()
                .unwrap()
                .run(&mut conv, "", &[], &executor)
                .await
                .unwrap();

            let ids: Vec<_> = conv.messages()[2]
                .content
                .tool_results()
                .map(|r| r.invocation_id.clone())
                .collect();
            assert_eq!(ids, ["slow", "fast"], "{mode:?}");

            if mode == DispatchMode::Sequential {
                assert_eq!(*executor.seen.lock().unwrap(), ["slow", "fast"]);
            }
        }
    }

    #[tokio::test]
    async fn test_transport_error_on_second_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["t1"], 50, 10)),
            Err(TransportError::Unavailable("overloaded".into())),
        ]));
        let mut conv = history();

        let err = tool_loop(provider.clone(), 10)
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Transport(TransportError::Unavailable(_))));
        assert_eq!(provider.calls(), 2);
        // Only the first iteration was committed
        assert_eq!(conv.len(), 3);
    }

    #[tokio::test]
    async fn test_usage_reported_by_observer_before_failure() {
        #[derive(Default)]
        struct Totals(Mutex<UsageTotals>);

        impl LoopObserver for Totals {
            fn on_model_response(&self, _iteration: usize, completion: &Completion) {
                self.0.lock().unwrap().record(&completion.usage);
            }
        }

        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["t1"], 50, 10)),
            Err(TransportError::Http("connection reset".into())),
        ]));
        let observer = Arc::new(Totals::default());
        let mut conv = history();

        let result = ToolLoop::with_defaults(provider)
            .with_observer(observer.clone())
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await;

        assert!(result.is_err());
        let totals = *observer.0.lock().unwrap();
        assert_eq!((totals.input_tokens, totals.output_tokens), (50, 10));
    }

    #[tokio::test]
    async fn test_iteration_timeout_leaves_history_untouched() {
        let mut provider = ScriptedProvider::repeating(tool_reply(&["t1"], 1, 1));
        provider.delay = Some(Duration::from_millis(500));
        let provider = Arc::new(provider);
        let mut conv = history();

        let err = ToolLoopBuilder::new()
            .provider(provider)
            .observer(Arc::new(NoopObserver))
            .iteration_timeout(Duration::from_millis(20))
            .build()
            .unwrap()
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Timeout { iteration: 1, .. }));
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_during_tool_dispatch_discards_iteration() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_reply(&["stuck"], 1, 1)));
        let executor = RecordingExecutor {
            delays: vec![("stuck".into(), Duration::from_secs(5))],
            ..Default::default()
        };
        let mut conv = history();

        let err = ToolLoopBuilder::new()
            .provider(provider)
            .observer(Arc::new(NoopObserver))
            .iteration_timeout(Duration::from_millis(30))
            .build()
            .unwrap()
            .run(&mut conv, "", &[], &executor)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let mut provider = ScriptedProvider::repeating(text_reply("late", 1, 1));
        provider.delay = Some(Duration::from_secs(5));
        let provider = Arc::new(provider);
        let cancel = CancellationToken::new();
        let mut conv = history();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tool_loop(provider, 10)
            .run_until_cancelled(&mut conv, "", &[], &RecordingExecutor::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled { iteration: 1 }));
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_stop_without_tools() {
        let mut truncated = text_reply("Partial answ", 5, 1024);
        truncated.stop = StopSignal::MaxTokens;
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(truncated)]));
        let mut conv = history();

        let response = tool_loop(provider, 10)
            .run(&mut conv, "", &[], &RecordingExecutor::default())
            .await
            .unwrap();

        assert_eq!(response.stop_reason, StopReason::Provider("max_tokens".into()));
        assert_eq!(response.content, "Partial answ");
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut empty = Conversation::new();

        let err = tool_loop(provider.clone(), 10)
            .run(&mut empty, "", &[], &RecordingExecutor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));

        let err = ToolLoop::new(
            provider.clone(),
            LoopConfig {
                max_iterations: 0,
                ..LoopConfig::default()
            },
        )
        .run(&mut history(), "", &[], &RecordingExecutor::default())
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_with_tools_entry_point() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_reply(&["t1"], 1, 1)));
        let executor = RecordingExecutor::default();
        let mut conv = history();

        let response = run_with_tools(provider.clone(), &mut conv, "", &[], &executor, Some(2))
            .await
            .unwrap();

        assert_eq!(response.stop_reason, StopReason::MaxIterationsReached);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_run_with_tools_default_bound() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_reply(&["t1"], 1, 1)));
        let mut conv = history();

        let response =
            run_with_tools(provider.clone(), &mut conv, "", &[], &RecordingExecutor::default(), None)
                .await
                .unwrap();

        assert_eq!(response.iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(provider.calls(), 10);
    }

    /// Records every observer hook as a short tag
    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LoopObserver for EventLog {
        fn on_iteration_start(&self, iteration: usize, _max: usize) {
            self.push(format!("start{iteration}"));
        }

        fn on_tool_dispatch(&self, iteration: usize, invocation: &ToolInvocation) {
            self.push(format!("dispatch{iteration}:{}", invocation.id));
        }

        fn on_tool_result(&self, iteration: usize, result: &ToolResult) {
            self.push(format!("result{iteration}:{}:{}", result.invocation_id, result.content));
        }

        fn on_finish(&self, response: &LoopResponse) {
            self.push(format!("finish:{}", response.stop_reason));
        }

        fn on_abort(&self, error: &AgentError) {
            self.push(format!("abort:{}", error.is_cancellation()));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_hooks_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["a"], 1, 1)),
            Ok(text_reply("Done", 1, 1)),
        ]));
        let executor = RecordingExecutor {
            empty_error: true,
            ..Default::default()
        };
        let log = Arc::new(EventLog::default());

        ToolLoop::with_defaults(provider)
            .with_observer(log.clone())
            .run(&mut history(), "", &[], &executor)
            .await
            .unwrap();

        assert_eq!(
            log.events(),
            ["start1", "dispatch1:a", "result1:a:(empty result)", "start2", "finish:completed"]
        );
    }

    #[tokio::test]
    async fn test_observer_aborts_on_transport_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_reply(&["a"], 1, 1)),
            Err(TransportError::Unavailable("down".into())),
        ]));
        let log = Arc::new(EventLog::default());

        let result = ToolLoop::with_defaults(provider)
            .with_observer(log.clone())
            .run(&mut history(), "", &[], &RecordingExecutor::default())
            .await;

        assert!(result.is_err());
        let events = log.events();
        assert_eq!(events.last().map(String::as_str), Some("abort:false"));
        assert!(!events.iter().any(|e| e.starts_with("finish")));
        assert_eq!(events.iter().filter(|e| e.starts_with("start")).count(), 2);
    }

    #[tokio::test]
    async fn test_complete_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_reply("Hi", 4, 2))]));
        let conv = history();

        let response = tool_loop(provider, 10).complete_once(&conv, "").await.unwrap();

        assert_eq!(response.content, "Hi");
        assert_eq!(response.stop_reason, StopReason::Completed);
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(ToolLoopBuilder::new().build(), Err(AgentError::Config(_))));
    }
}
