//! The turn engine: sequences user, assistant and tool turns.
//!
//! One engine owns one conversation. It calls the provider, hands tool
//! invocations to the dispatcher and either loops back to the provider or,
//! when a tool suspends, parks the rest of the turn behind a single-use
//! [`ContinuationToken`] in the shared [`ContinuationStore`].
//!
//! ```ignore
//! let mut engine = turnloop::builder()
//!     .context(app)
//!     .provider(provider)
//!     .tools(tools)
//!     .build()?;
//!
//! let mut result = engine.run_user_turn("list files then delete tmp.txt").await?;
//! while let Some(pending) = result.pending.take() {
//!     let answer = ask_user(pending.kind, &pending.spec).await;
//!     result = engine.resume(&pending.token, answer).await?;
//! }
//! ```
//!
//! Every operation returns a [`TurnResult`] describing the whole logical
//! operation: a result that follows a resume includes the usage and provider
//! calls spent before the suspension.

mod agent;
mod builder;
mod helpers;
mod llm;
mod resume;
mod turn;
mod types;

#[cfg(test)]
mod test_utils;

pub use builder::TurnEngineBuilder;

use crate::context::{ConversationState, Role};
use crate::events::EventSink;
use crate::hooks::{DefaultHooks, EngineHooks};
use crate::interaction::InteractionHandler;
use crate::llm::LlmProvider;
use crate::sentinel::{DisplayMode, SentinelDetector};
use crate::stores::{ContinuationStore, ContinuationToken};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{EngineConfig, SessionId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use types::Outstanding;

/// Drives one conversation against one provider.
///
/// Not `Clone`: the conversation is owned exclusively. Engines for other
/// sessions run independently and share only the continuation store.
pub struct TurnEngine<Ctx, P, H = DefaultHooks> {
    provider: Arc<P>,
    tools: ToolRegistry<Ctx>,
    tool_context: ToolContext<Ctx>,
    events: EventSink<H>,
    store: Arc<dyn ContinuationStore>,
    interaction_handler: Option<Arc<dyn InteractionHandler>>,
    config: EngineConfig,
    sentinels: SentinelDetector,
    display_mode: DisplayMode,
    state: ConversationState,
    session_id: SessionId,
    cancel: CancellationToken,
    outstanding: Option<Outstanding>,
}

impl<Ctx, P, H> TurnEngine<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: EngineHooks,
{
    #[must_use]
    pub const fn conversation(&self) -> &ConversationState {
        &self.state
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry<Ctx> {
        &self.tools
    }

    #[must_use]
    pub const fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub const fn set_display_mode(&mut self, mode: DisplayMode) {
        self.display_mode = mode;
    }

    /// Token of the suspension this engine is waiting on, if any.
    #[must_use]
    pub fn pending_token(&self) -> Option<&ContinuationToken> {
        self.outstanding.as_ref().map(|o| &o.token)
    }

    /// Handle that aborts the in-flight provider call when cancelled.
    ///
    /// The operation observing the cancellation ends with
    /// [`crate::TerminationReason::Cancelled`]; the engine then arms a fresh
    /// handle, so fetch a new one for the next operation.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn last_assistant_text(&self) -> String {
        self.state
            .last_assistant()
            .map(|t| t.content.clone())
            .unwrap_or_default()
    }

    /// Named content from every assistant turn so far.
    pub(crate) fn earlier_named_content(&self) -> crate::pseudo_tools::NamedContent {
        crate::pseudo_tools::named_content(
            self.state
                .turns()
                .iter()
                .filter(|t| t.role == Role::Assistant)
                .map(|t| t.content.as_str()),
        )
    }

    /// Arm a new cancellation handle once the old one has fired.
    fn rearm_cancel(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }
}
