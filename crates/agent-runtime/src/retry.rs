//! Retrying Transport
//!
//! Wraps any `LlmProvider` and retries transient failures with exponential
//! backoff. The tool loop itself never retries.

use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    error::TransportError,
    message::Message,
    provider::{Completion, LlmProvider},
    tool::ToolSchema,
};
use async_trait::async_trait;

/// Retry schedule
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay that follows `current`, doubled and capped at `max_backoff`
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Provider wrapper that retries `is_retryable` errors
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Completion, TransportError> {
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0;

        loop {
            match self
                .inner
                .complete(messages, system_prompt, tools, max_tokens)
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt,
                        error = %e,
                        "Retrying model call"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.policy.next_backoff(backoff);
                }
                outcome => return outcome,
            }
        }
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_core::provider::{StopSignal, TokenUsage};

    use super::*;

    /// Fails a fixed number of times before answering
    struct Flaky {
        failures: usize,
        error: TransportError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _system_prompt: &str,
            _tools: &[ToolSchema],
            _max_tokens: u32,
        ) -> Result<Completion, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(Completion {
                blocks: Vec::new(),
                stop: StopSignal::EndTurn,
                usage: TokenUsage::default(),
                model: "flaky-1".into(),
                raw: None,
            })
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            error: TransportError::RateLimited("429".into()),
            calls: AtomicUsize::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), policy(3));

        let completion = provider.complete(&[], "", &[], 16).await.unwrap();

        assert_eq!(completion.model, "flaky-1");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            error: TransportError::Unavailable("down".into()),
            calls: AtomicUsize::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), policy(2));

        let err = provider.complete(&[], "", &[], 16).await.unwrap_err();

        assert!(matches!(err, TransportError::Unavailable(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let flaky = Arc::new(Flaky {
            failures: 1,
            error: TransportError::Auth("bad key".into()),
            calls: AtomicUsize::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), policy(3));

        assert!(provider.complete(&[], "", &[], 16).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_backoff(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(policy.next_backoff(Duration::from_secs(6)), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates_near_duration_max() {
        let policy = RetryPolicy {
            max_backoff: Duration::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_backoff(Duration::MAX), Duration::MAX);
        assert_eq!(policy.next_backoff(Duration::MAX / 2 + Duration::from_secs(1)), Duration::MAX);
    }
}
