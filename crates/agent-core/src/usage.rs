//! Token Accounting
//!
//! Running totals for one run. Totals only ever grow.

use serde::{Deserialize, Serialize};

use crate::provider::TokenUsage;

/// Accumulated token usage across every model call of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one response's usage. Missing or negative counts add nothing.
    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(clamp(usage.input_tokens));
        self.output_tokens = self.output_tokens.saturating_add(clamp(usage.output_tokens));
    }

    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

fn clamp(count: Option<i64>) -> u64 {
    count.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}
