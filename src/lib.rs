//! Turnloop - turn orchestration and suspend/resume for tool-calling LLM
//! conversations.
//!
//! This crate provides:
//! - A [`TurnEngine`] that sequences user, assistant and tool turns
//! - Stepwise [`Tool`]s that can pause for user input and resume later
//! - Single-use continuation tokens backed by a shared [`ContinuationStore`]
//! - Pseudo-tool parsing for models without structured tool calling
//! - Bounded autonomous agent loops with finish markers
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use turnloop::{EngineConfig, InMemoryContinuationStore, InteractionResponse, ToolRegistry};
//!
//! let store = Arc::new(InMemoryContinuationStore::new());
//! let mut tools = ToolRegistry::new();
//! tools.register(DeleteFile);
//!
//! let mut engine = turnloop::builder()
//!     .context(app)
//!     .provider(provider)
//!     .tools(tools)
//!     .store(store)
//!     .config(EngineConfig::default())
//!     .build()?;
//!
//! let result = engine.run_user_turn("delete tmp.txt").await?;
//! if let Some(pending) = result.pending {
//!     engine.resume(&pending.token, InteractionResponse::confirm(true)).await?;
//! }
//! ```

#![forbid(unsafe_code)]

pub mod context;
mod dispatch;
mod engine;
mod error;
mod events;
mod hooks;
pub mod interaction;
pub mod llm;
pub mod pseudo_tools;
mod sentinel;
mod stores;
mod tools;
mod types;

pub use context::{ConversationState, Role, ToolCall, Turn};
pub use engine::{TurnEngine, TurnEngineBuilder};
pub use error::EngineError;
pub use events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
pub use hooks::{DefaultHooks, EngineHooks, LoggingHooks, ToolDecision};
pub use interaction::{
    ChannelInteractionHandler, InteractionHandler, InteractionKind, InteractionRequest,
    InteractionResponse,
};
pub use llm::LlmProvider;
pub use sentinel::{DisplayMode, SentinelDetector};
pub use stores::{ContinuationStore, ContinuationToken, InMemoryContinuationStore, StoredContinuation};
pub use tools::{
    DynamicToolName, Tool, ToolContext, ToolInput, ToolName, ToolOutcome, ToolRegistry,
};
pub use types::{
    EngineConfig, ModelPricing, PendingInteraction, RetryConfig, SessionId, TerminationReason,
    TokenUsage, ToolResult, ToolTier, TurnResult, WritePolicy,
};

/// Start building a [`TurnEngine`].
#[must_use]
pub fn builder<Ctx>() -> TurnEngineBuilder<Ctx, (), ()> {
    TurnEngineBuilder::new()
}
