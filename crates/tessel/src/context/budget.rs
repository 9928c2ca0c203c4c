//! Per-model context budgets.
//!
//! A [`ContextConfig`] is derived from the active provider's declared context
//! window, the current system prompt, and the advertised tool schemas:
//!
//! ```text
//! overhead       = system_prompt_tokens + tool_definition_tokens + output_reserve + safety_buffer
//! adaptive_limit = context_window - overhead
//! effective      = max(adaptive_limit, min_viable_context)
//! ```
//!
//! Reserves are not fixed constants: they scale with the window's
//! [`ContextTier`], so an 8K model and a 200K model keep proportionate
//! headroom. Token counts are approximate and pluggable through
//! [`TokenEstimator`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Message, ToolDef};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-message framing overhead, in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

// ── Estimation ────────────────────────────────────────────────────

/// Approximate token counting. Exact tokenizers can be plugged in here.
pub trait TokenEstimator: Send + Sync {
    fn estimate_text(&self, text: &str) -> usize;

    fn estimate_message(&self, message: &Message) -> usize {
        self.estimate_chars(message.char_len()) + MESSAGE_OVERHEAD_TOKENS
    }

    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    fn estimate_chars(&self, chars: usize) -> usize;
}

/// Character-ratio estimator.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: f64) -> Self {
        Self {
            chars_per_token: if chars_per_token > 0.0 {
                chars_per_token
            } else {
                DEFAULT_CHARS_PER_TOKEN
            },
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate_text(&self, text: &str) -> usize {
        self.estimate_chars(text.len())
    }

    fn estimate_chars(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

// ── Tiers ─────────────────────────────────────────────────────────

/// Context-window size bracket.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextTier {
    /// Under 32K tokens.
    Small,
    /// 32K up to 128K tokens.
    Medium,
    /// 128K tokens and above.
    Large,
}

/// Budget parameters that scale with the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierReserves {
    pub output_reserve: usize,
    pub safety_buffer: usize,
    pub min_viable_context: usize,
    pub tool_results_token_budget: usize,
    pub tool_result_truncate_threshold: usize,
    pub max_immediate_tool_result: usize,
}

impl ContextTier {
    pub fn for_window(context_window: usize) -> Self {
        match context_window {
            w if w < 32_000 => ContextTier::Small,
            w if w < 128_000 => ContextTier::Medium,
            _ => ContextTier::Large,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContextTier::Small => "small",
            ContextTier::Medium => "medium",
            ContextTier::Large => "large",
        }
    }

    pub fn reserves(self) -> TierReserves {
        match self {
            ContextTier::Small => TierReserves {
                output_reserve: 2_048,
                safety_buffer: 512,
                min_viable_context: 2_000,
                tool_results_token_budget: 4_000,
                tool_result_truncate_threshold: 1_500,
                max_immediate_tool_result: 3_000,
            },
            ContextTier::Medium => TierReserves {
                output_reserve: 4_096,
                safety_buffer: 2_000,
                min_viable_context: 6_000,
                tool_results_token_budget: 16_000,
                tool_result_truncate_threshold: 4_000,
                max_immediate_tool_result: 8_000,
            },
            ContextTier::Large => TierReserves {
                output_reserve: 8_192,
                safety_buffer: 5_000,
                min_viable_context: 12_000,
                tool_results_token_budget: 40_000,
                tool_result_truncate_threshold: 8_000,
                max_immediate_tool_result: 20_000,
            },
        }
    }
}

// ── ContextConfig ─────────────────────────────────────────────────

/// Budget for the active provider/model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    pub context_window: usize,
    pub max_output_tokens: usize,
    pub safety_buffer: usize,
    pub min_viable_context: usize,
    pub tool_results_token_budget: usize,
    pub tool_result_truncate_threshold: usize,
    pub max_immediate_tool_result: usize,
    pub tier: ContextTier,
    /// Tokens taken by the system prompt, tool schemas, and reserves.
    pub overhead: usize,
    /// Budget available to conversation history.
    pub effective_limit: usize,
}

impl ContextConfig {
    pub fn tier_name(&self) -> &'static str {
        self.tier.name()
    }

    /// Whether the adaptive limit fell below the minimum viable context.
    pub fn is_tight(&self) -> bool {
        self.context_window.saturating_sub(self.overhead) < self.min_viable_context
    }
}

/// Derive a [`ContextConfig`] for a model with `context_window` tokens.
pub fn compute_context_config(
    context_window: usize,
    system_prompt: &str,
    tools: &[ToolDef],
    estimator: &dyn TokenEstimator,
) -> ContextConfig {
    let tier = ContextTier::for_window(context_window);
    let reserves = tier.reserves();

    let system_tokens = estimator.estimate_text(system_prompt);
    let tool_tokens: usize = tools
        .iter()
        .map(|t| estimator.estimate_chars(serde_json::to_string(t).map_or(0, |s| s.len())))
        .sum();

    let overhead = system_tokens + tool_tokens + reserves.output_reserve + reserves.safety_buffer;
    let adaptive_limit = context_window.saturating_sub(overhead);
    let effective_limit = adaptive_limit.max(reserves.min_viable_context);

    let config = ContextConfig {
        context_window,
        max_output_tokens: reserves.output_reserve,
        safety_buffer: reserves.safety_buffer,
        min_viable_context: reserves.min_viable_context,
        tool_results_token_budget: reserves.tool_results_token_budget,
        tool_result_truncate_threshold: reserves.tool_result_truncate_threshold,
        max_immediate_tool_result: reserves.max_immediate_tool_result,
        tier,
        overhead,
        effective_limit,
    };

    if config.is_tight() {
        warn!(
            "Tight context budget: window={context_window}, overhead={overhead} \
             (system={system_tokens}, tools={tool_tokens}); using minimum viable context {}",
            config.min_viable_context
        );
    } else {
        debug!(
            "Context budget: tier={}, window={context_window}, effective={effective_limit}",
            tier.name()
        );
    }
    config
}

// ── ContextBudget ─────────────────────────────────────────────────

/// Owns the active [`ContextConfig`] and the estimator used against it.
///
/// The config is recomputed on every provider switch, unless the user set
/// an explicit override, which is kept as-is.
pub struct ContextBudget {
    config: ContextConfig,
    estimator: Arc<dyn TokenEstimator>,
    overridden: bool,
}

impl ContextBudget {
    pub fn new(
        context_window: usize,
        system_prompt: &str,
        tools: &[ToolDef],
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        let config = compute_context_config(context_window, system_prompt, tools, &*estimator);
        Self {
            config,
            estimator,
            overridden: false,
        }
    }

    /// Pin a user-chosen config that provider switches never replace.
    pub fn with_override(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self.overridden = true;
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn effective_limit(&self) -> usize {
        self.config.effective_limit
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        &*self.estimator
    }

    /// Recompute for a new provider. Returns `false` when an override is pinned.
    pub fn recompute(&mut self, context_window: usize, system_prompt: &str, tools: &[ToolDef]) -> bool {
        if self.overridden {
            debug!("Context budget override in place; not recomputing");
            return false;
        }
        self.config = compute_context_config(context_window, system_prompt, tools, &*self.estimator);
        true
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        self.estimator.estimate_messages(messages)
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        self.estimator.estimate_text(text)
    }

    /// Snapshot of history usage against the effective limit.
    pub fn usage(&self, messages: &[Message], extra_tokens: usize) -> ContextUsage {
        let estimated_tokens = self.estimate_messages(messages) + extra_tokens;
        let limit = self.config.effective_limit;
        ContextUsage {
            estimated_tokens,
            effective_limit: limit,
            usage_pct: if limit > 0 {
                estimated_tokens as f64 / limit as f64
            } else {
                1.0
            },
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    pub estimated_tokens: usize,
    pub effective_limit: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn exceeds_limit(&self) -> bool {
        self.estimated_tokens > self.effective_limit
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.effective_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn estimator() -> Arc<dyn TokenEstimator> {
        Arc::new(CharRatioEstimator::default())
    }

    #[test]
    fn tiers_follow_window_size() {
        assert_eq!(ContextTier::for_window(8_192), ContextTier::Small);
        assert_eq!(ContextTier::for_window(32_000), ContextTier::Medium);
        assert_eq!(ContextTier::for_window(200_000), ContextTier::Large);
    }

    #[test]
    fn reserves_scale_with_tier() {
        let small = ContextTier::Small.reserves();
        let large = ContextTier::Large.reserves();
        assert!(small.output_reserve < large.output_reserve);
        assert!(small.safety_buffer < large.safety_buffer);
        assert!(small.min_viable_context < large.min_viable_context);
    }

    #[test]
    fn effective_limit_subtracts_overhead() {
        let prompt = "x".repeat(3_500); // 1000 tokens
        let config = compute_context_config(200_000, &prompt, &[], &CharRatioEstimator::default());
        let reserves = ContextTier::Large.reserves();
        assert_eq!(
            config.overhead,
            1_000 + reserves.output_reserve + reserves.safety_buffer
        );
        assert_eq!(config.effective_limit, 200_000 - config.overhead);
        assert_eq!(config.tier_name(), "large");
        assert!(!config.is_tight());
    }

    #[test]
    fn tool_schemas_count_toward_overhead() {
        let tools = vec![ToolDef::new(
            "read_file",
            "Read a file from disk".repeat(20),
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )];
        let without = compute_context_config(100_000, "", &[], &CharRatioEstimator::default());
        let with = compute_context_config(100_000, "", &tools, &CharRatioEstimator::default());
        assert!(with.overhead > without.overhead);
        assert!(with.effective_limit < without.effective_limit);
    }

    #[test]
    fn tight_budget_falls_back_to_min_viable() {
        let prompt = "x".repeat(35_000); // 10K tokens, more than an 8K window
        let config = compute_context_config(8_192, &prompt, &[], &CharRatioEstimator::default());
        assert!(config.is_tight());
        assert_eq!(config.effective_limit, config.min_viable_context);
    }

    #[test]
    fn recompute_respects_override() {
        let mut budget = ContextBudget::new(200_000, "sys", &[], estimator());
        let before = budget.effective_limit();
        assert!(budget.recompute(16_000, "sys", &[]));
        assert!(budget.effective_limit() < before);

        let pinned = compute_context_config(50_000, "", &[], &CharRatioEstimator::default());
        let mut budget = ContextBudget::new(200_000, "sys", &[], estimator()).with_override(pinned.clone());
        assert!(!budget.recompute(8_000, "sys", &[]));
        assert_eq!(budget.config(), &pinned);
    }

    #[test]
    fn usage_reports_against_effective_limit() {
        let budget = ContextBudget::new(16_000, "", &[], estimator());
        let messages = vec![Message::user("a".repeat(70_000))];
        let usage = budget.usage(&messages, 0);
        assert!(usage.exceeds_limit());
        assert!(usage.to_log_string().contains("tokens"));
    }

    #[test]
    fn estimator_rounds_up() {
        let est = CharRatioEstimator::new(4.0);
        assert_eq!(est.estimate_text("abcde"), 2);
        assert_eq!(est.estimate_text(""), 0);
        assert_eq!(CharRatioEstimator::new(0.0).estimate_text("abcdefg"), 2);
    }
}
