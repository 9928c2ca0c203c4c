//! Configuration for the [`Agent`](super::harness::Agent).
//!
//! Every field has a default, so a config file only needs the settings it
//! changes:
//!
//! ```ignore
//! let config: AgentConfig = serde_json::from_str(r#"{"max_iterations": 20}"#)?;
//! ```
//!
//! or, in code:
//!
//! ```ignore
//! let config = AgentConfig::default()
//!     .with_max_iterations(20)
//!     .with_auto_approve_tools(["read_file", "grep"])
//!     .with_compression(true);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::checkpoint::CheckpointConfig;
use crate::approval::DangerPatternConfig;
use crate::context::compaction::CompactionConfig;
use crate::context::compression::CompressionConfig;
use crate::context::scoring::ScoringWeights;
use crate::context::summarizer::SummarizerConfig;
use crate::context::windowing::WindowingConfig;
use crate::tools::batch::DEFAULT_MAX_CONCURRENCY;

pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;
pub const DEFAULT_MAX_CHAT_DURATION: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    /// Iterations in a row with at least one failed or denied call before
    /// the loop gives up.
    pub max_consecutive_errors: u32,
    /// Wall-clock budget for one `chat` call, checked at the top of every
    /// iteration. Serialized as seconds.
    #[serde(with = "duration_secs")]
    pub max_chat_duration: Duration,
    pub use_tools: bool,
    /// Recover tool calls from response text when the provider reports none.
    pub extract_tools_from_text: bool,
    pub auto_approve_all: bool,
    pub auto_approve_tools: Vec<String>,
    pub dangerous_patterns: Vec<DangerPatternConfig>,
    pub max_history_messages: usize,
    pub max_tool_concurrency: usize,
    /// Use this window size instead of the provider's, and never recompute.
    pub context_window_override: Option<usize>,
    pub max_output_tokens: Option<u32>,
    pub windowing: WindowingConfig,
    pub scoring: ScoringWeights,
    pub summarizer: SummarizerConfig,
    pub compression: CompressionConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            max_chat_duration: DEFAULT_MAX_CHAT_DURATION,
            use_tools: true,
            extract_tools_from_text: true,
            auto_approve_all: false,
            auto_approve_tools: Vec::new(),
            dangerous_patterns: Vec::new(),
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            max_tool_concurrency: DEFAULT_MAX_CONCURRENCY,
            context_window_override: None,
            max_output_tokens: None,
            windowing: WindowingConfig::default(),
            scoring: ScoringWeights::default(),
            summarizer: SummarizerConfig::default(),
            compression: CompressionConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_consecutive_errors(mut self, n: u32) -> Self {
        self.max_consecutive_errors = n;
        self
    }

    pub fn with_max_chat_duration(mut self, limit: Duration) -> Self {
        self.max_chat_duration = limit;
        self
    }

    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.use_tools = enabled;
        self
    }

    pub fn with_text_extraction(mut self, enabled: bool) -> Self {
        self.extract_tools_from_text = enabled;
        self
    }

    pub fn with_auto_approve_all(mut self, yes: bool) -> Self {
        self.auto_approve_all = yes;
        self
    }

    pub fn with_auto_approve_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_approve_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_max_history_messages(mut self, n: usize) -> Self {
        self.max_history_messages = n;
        self
    }

    pub fn with_max_tool_concurrency(mut self, n: usize) -> Self {
        self.max_tool_concurrency = n.max(1);
        self
    }

    pub fn with_context_window_override(mut self, tokens: usize) -> Self {
        self.context_window_override = Some(tokens);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression.enabled = enabled;
        self
    }

    pub fn with_checkpoints(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint = CheckpointConfig {
            enabled: true,
            dir: dir.into(),
        };
        self
    }

    pub(crate) fn compaction(&self) -> CompactionConfig {
        CompactionConfig {
            windowing: self.windowing.clone(),
            weights: self.scoring,
            max_history_messages: self.max_history_messages,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
