//! Loop Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on model calls per run
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default per-call token budget
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Written in place of empty tool output
pub const DEFAULT_EMPTY_RESULT_PLACEHOLDER: &str = "(empty result)";

/// Final content when the iteration bound is hit
pub const DEFAULT_MAX_ITERATIONS_MESSAGE: &str = "Max tool iterations reached";

/// How one batch of invocations is executed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One at a time, in emission order
    #[default]
    Sequential,
    /// All at once; results still assembled in emission order
    Concurrent,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

/// Tool loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum model calls before giving up
    pub max_iterations: usize,

    /// Token budget passed to every model call
    pub max_tokens: u32,

    /// Substituted for empty tool-result content
    pub empty_result_placeholder: String,

    /// Content of the response when the bound is exhausted
    pub max_iterations_message: String,

    /// Upper bound on one iteration (model call plus tool dispatch).
    /// Zero means no bound.
    #[serde(default, with = "optional_secs")]
    pub iteration_timeout: Option<Duration>,

    /// Tool dispatch policy within a batch
    #[serde(default)]
    pub dispatch: DispatchMode,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
            empty_result_placeholder: DEFAULT_EMPTY_RESULT_PLACEHOLDER.into(),
            max_iterations_message: DEFAULT_MAX_ITERATIONS_MESSAGE.into(),
            iteration_timeout: None,
            dispatch: DispatchMode::default(),
        }
    }
}

impl LoopConfig {
    /// Read overrides from `AGENT_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = lookup("AGENT_MAX_ITERATIONS")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.max_iterations = n;
        }
        if let Some(n) = lookup("AGENT_MAX_TOKENS").and_then(|v| v.parse::<u32>().ok()) {
            config.max_tokens = n;
        }
        if let Some(secs) = lookup("AGENT_ITERATION_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.iteration_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(text) = lookup("AGENT_EMPTY_RESULT_PLACEHOLDER").filter(|v| !v.is_empty()) {
            config.empty_result_placeholder = text;
        }
        if let Some(mode) = lookup("AGENT_DISPATCH").and_then(|v| v.parse::<DispatchMode>().ok()) {
            config.dispatch = mode;
        }

        config
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    #[allow(clippy::float_cmp)]
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) if secs == 0.0 => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
