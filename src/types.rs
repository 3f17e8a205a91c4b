//! Core types shared across the engine.
//!
//! - [`SessionId`]: Identifier for one engine instance's conversation
//! - [`EngineConfig`]: Configuration for the turn engine
//! - [`TokenUsage`] / [`ModelPricing`]: Token consumption and cost
//! - [`ToolResult`]: Result returned from tool execution
//! - [`ToolTier`] / [`WritePolicy`]: Side-effect classification and policy
//! - [`TurnResult`]: What a user turn, agent loop, or resume hands back
//! - [`TerminationReason`]: Why a turn or loop stopped

use crate::error::EngineError;
use crate::interaction::InteractionKind;
use crate::stores::ContinuationToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identifier for a conversation session.
///
/// Continuation tokens are scoped to the session that minted them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the engine treats tools that mutate external state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Mutating tools run normally.
    #[default]
    Allow,
    /// Mutating tools are refused with a model-visible error.
    Deny,
    /// Mutating tools run but must only report what they would do.
    DryRun,
}

impl WritePolicy {
    /// Note injected into agent steps so the model knows about the policy.
    #[must_use]
    pub const fn agent_note(self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny => Some(
                "Write policy: deny. Tools that modify files or external state will be refused; \
                 plan using read-only tools.",
            ),
            Self::DryRun => Some(
                "Write policy: dry-run. Tools that modify files or external state only report \
                 what they would change; nothing is committed.",
            ),
        }
    }
}

/// Per-million-token prices used to compute [`TurnResult::cost`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Configuration for the turn engine.
///
/// Deserializable so front-ends can load it from whatever format they use;
/// missing fields fall back to [`EngineConfig::default`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// System prompt sent with every provider request
    pub system_prompt: String,
    /// Model identifier
    pub model: String,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Maximum provider calls within one user turn (tool-loop guard)
    pub max_iterations: usize,
    /// Stream provider responses, emitting `TextDelta` events as text arrives
    pub streaming: bool,
    /// Retry configuration for transient provider errors
    pub retry: RetryConfig,
    /// Per-attempt provider call timeout in milliseconds (0 disables)
    pub provider_timeout_ms: u64,
    /// Lifetime of continuation tokens in seconds
    pub continuation_ttl_secs: u64,
    /// Estimated-token ceiling above which interactive auto-submit is skipped
    pub auto_submit_token_limit: Option<usize>,
    /// Policy for tools with [`ToolTier::Mutate`]
    pub write_policy: WritePolicy,
    /// Finish markers recognised in agent mode
    pub sentinels: Vec<String>,
    /// Pricing for cost accounting; cost stays zero when unset
    pub pricing: Option<ModelPricing>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: String::from("default"),
            max_tokens: 4096,
            max_iterations: 10,
            streaming: false,
            retry: RetryConfig::default(),
            provider_timeout_ms: 120_000,
            continuation_ttl_secs: 3600,
            auto_submit_token_limit: None,
            write_policy: WritePolicy::Allow,
            sentinels: crate::sentinel::DEFAULT_MARKERS
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            pricing: None,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.model.trim().is_empty() {
            return Err(EngineError::Configuration("model must not be empty".into()));
        }
        if self.max_iterations == 0 {
            return Err(EngineError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.continuation_ttl_secs == 0 {
            return Err(EngineError::Configuration(
                "continuation_ttl_secs must be at least 1".into(),
            ));
        }
        if self.sentinels.iter().any(|s| s.trim().is_empty()) {
            return Err(EngineError::Configuration(
                "sentinel markers must not be blank".into(),
            ));
        }
        if self.sentinels.iter().any(|s| !s.is_ascii()) {
            return Err(EngineError::Configuration(
                "sentinel markers must be ASCII".into(),
            ));
        }
        if let Some(pricing) = &self.pricing
            && (pricing.input_per_million < 0.0 || pricing.output_per_million < 0.0)
        {
            return Err(EngineError::Configuration(
                "pricing must not be negative".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Option<Duration> {
        (self.provider_timeout_ms > 0).then(|| Duration::from_millis(self.provider_timeout_ms))
    }

    #[must_use]
    pub const fn continuation_ttl(&self) -> Duration {
        Duration::from_secs(self.continuation_ttl_secs)
    }
}

/// Configuration for retry behavior on transient errors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub const fn add(&mut self, other: &Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    #[must_use]
    pub fn cost(&self, pricing: &ModelPricing) -> f64 {
        (f64::from(self.input_tokens) * pricing.input_per_million
            + f64::from(self.output_tokens) * pricing.output_per_million)
            / 1_000_000.0
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content (fed back to the model)
    pub output: String,
    /// Optional structured data
    pub data: Option<serde_json::Value>,
    /// Duration of the tool execution in milliseconds
    pub duration_ms: Option<u64>,
    /// Ask the engine for a follow-up assistant turn once the batch finishes
    #[serde(default)]
    pub auto_submit: bool,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            duration_ms: None,
            auto_submit: false,
        }
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success(output)
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            data: None,
            duration_ms: None,
            auto_submit: false,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub const fn with_auto_submit(mut self) -> Self {
        self.auto_submit = true;
        self
    }
}

/// Side-effect classification for tools
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// Read-only; unaffected by the write policy
    #[default]
    Observe,
    /// Modifies files or external state; subject to [`WritePolicy`]
    Mutate,
}

/// Why a turn, resume, or agent loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The assistant finished without further tool calls.
    Done,
    /// A finish marker was found in the assistant text (agent mode).
    DoneBySentinel,
    /// The agent loop ran all of its steps.
    DoneByStepLimit,
    /// The tool-call loop hit `max_iterations`.
    IterationLimit,
    /// A tool needs caller input; see [`TurnResult::pending`].
    Suspended,
    /// The caller cancelled the in-flight operation.
    Cancelled,
    /// A provider or configuration failure stopped the loop.
    Aborted,
}

impl TerminationReason {
    #[must_use]
    pub const fn is_suspended(self) -> bool {
        matches!(self, Self::Suspended)
    }
}

/// Interaction the caller must answer before the turn can continue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingInteraction {
    pub kind: InteractionKind,
    pub spec: serde_json::Value,
    pub token: ContinuationToken,
    /// Tool call that raised the interaction
    pub tool_call_id: String,
    pub tool_name: String,
}

/// Outcome of a user turn, agent loop, or resume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnResult {
    /// Latest assistant text, rendered for the requested display mode
    pub text: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub termination_reason: TerminationReason,
    pub pending: Option<PendingInteraction>,
    /// Number of provider calls made while producing this result
    pub provider_calls: usize,
    /// Set when an auto-submit follow-up was skipped by the input-size gate
    #[serde(default)]
    pub auto_submit_skipped: bool,
    /// Failure that aborted an agent loop, with usage kept above
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnResult {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
