use crate::context::ConversationState;
use crate::error::EngineError;
use crate::events::{AgentEventEnvelope, EventSink, SequenceCounter};
use crate::hooks::{DefaultHooks, EngineHooks};
use crate::interaction::InteractionHandler;
use crate::llm::LlmProvider;
use crate::sentinel::{DisplayMode, SentinelDetector};
use crate::stores::{ContinuationStore, InMemoryContinuationStore};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{EngineConfig, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::TurnEngine;

/// Builder for constructing a [`TurnEngine`].
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryContinuationStore::new());
/// let engine = turnloop::builder()
///     .context(app)
///     .provider(my_provider)
///     .tools(my_tools)
///     .store(store.clone())
///     .config(EngineConfig::default())
///     .build()?;
/// ```
pub struct TurnEngineBuilder<Ctx, P, H> {
    app: Option<Ctx>,
    provider: Option<P>,
    hooks: Option<H>,
    tools: Option<ToolRegistry<Ctx>>,
    config: Option<EngineConfig>,
    store: Option<Arc<dyn ContinuationStore>>,
    interaction_handler: Option<Arc<dyn InteractionHandler>>,
    event_tx: Option<mpsc::Sender<AgentEventEnvelope>>,
    session_id: Option<SessionId>,
    conversation: Option<ConversationState>,
    display_mode: DisplayMode,
}

impl<Ctx> TurnEngineBuilder<Ctx, (), ()> {
    /// Create a new builder with no components set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            app: None,
            provider: None,
            hooks: None,
            tools: None,
            config: None,
            store: None,
            interaction_handler: None,
            event_tx: None,
            session_id: None,
            conversation: None,
            display_mode: DisplayMode::default(),
        }
    }
}

impl<Ctx> Default for TurnEngineBuilder<Ctx, (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx, P, H> TurnEngineBuilder<Ctx, P, H> {
    /// Set the provider adapter.
    #[must_use]
    pub fn provider<P2: LlmProvider>(self, provider: P2) -> TurnEngineBuilder<Ctx, P2, H> {
        TurnEngineBuilder {
            app: self.app,
            provider: Some(provider),
            hooks: self.hooks,
            tools: self.tools,
            config: self.config,
            store: self.store,
            interaction_handler: self.interaction_handler,
            event_tx: self.event_tx,
            session_id: self.session_id,
            conversation: self.conversation,
            display_mode: self.display_mode,
        }
    }

    /// Set the lifecycle hooks.
    #[must_use]
    pub fn hooks<H2: EngineHooks>(self, hooks: H2) -> TurnEngineBuilder<Ctx, P, H2> {
        TurnEngineBuilder {
            app: self.app,
            provider: self.provider,
            hooks: Some(hooks),
            tools: self.tools,
            config: self.config,
            store: self.store,
            interaction_handler: self.interaction_handler,
            event_tx: self.event_tx,
            session_id: self.session_id,
            conversation: self.conversation,
            display_mode: self.display_mode,
        }
    }

    /// Application context handed to every tool.
    #[must_use]
    pub fn context(mut self, app: Ctx) -> Self {
        self.app = Some(app);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry<Ctx>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Continuation store shared with other engines.
    ///
    /// Defaults to a private [`InMemoryContinuationStore`], which is enough
    /// for a single long-lived engine.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ContinuationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Answer interactions in-process instead of suspending.
    ///
    /// For blocking front-ends. No continuation tokens are minted while a
    /// handler is installed.
    #[must_use]
    pub fn interaction_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.interaction_handler = Some(handler);
        self
    }

    /// Send events to `tx`. Tools share the channel and its sequence.
    #[must_use]
    pub fn events(mut self, tx: mpsc::Sender<AgentEventEnvelope>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Session that owns minted tokens. Use the same id on every engine that
    /// should be able to resume them.
    #[must_use]
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Start from a previously exported conversation.
    #[must_use]
    pub fn conversation(mut self, conversation: ConversationState) -> Self {
        self.conversation = Some(conversation);
        self
    }

    #[must_use]
    pub const fn display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = mode;
        self
    }

    fn assemble<H2>(self, hooks: H2) -> Result<TurnEngine<Ctx, P, H2>, EngineError>
    where
        Ctx: Send + Sync + 'static,
        P: LlmProvider,
        H2: EngineHooks,
    {
        let provider = self
            .provider
            .ok_or_else(|| EngineError::Configuration("provider is required".into()))?;
        let app = self
            .app
            .ok_or_else(|| EngineError::Configuration("application context is required".into()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let session_id = self.session_id.unwrap_or_default();
        let seq = SequenceCounter::new();
        let mut tool_context = ToolContext::new(app)
            .with_write_policy(config.write_policy)
            .with_session(session_id.clone());
        if let Some(tx) = &self.event_tx {
            tool_context = tool_context.with_event_tx(tx.clone(), seq.clone());
        }

        Ok(TurnEngine {
            provider: Arc::new(provider),
            tools: self.tools.unwrap_or_default(),
            tool_context,
            events: EventSink::new(self.event_tx, seq, Arc::new(hooks)),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryContinuationStore::new())),
            interaction_handler: self.interaction_handler,
            sentinels: SentinelDetector::new(&config.sentinels),
            config,
            display_mode: self.display_mode,
            state: self.conversation.unwrap_or_default(),
            session_id,
            cancel: CancellationToken::new(),
            outstanding: None,
        })
    }
}

impl<Ctx, P> TurnEngineBuilder<Ctx, P, ()>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
{
    /// Build the engine with [`DefaultHooks`].
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if the provider or the
    /// application context is missing, or the configuration is invalid.
    pub fn build(self) -> Result<TurnEngine<Ctx, P, DefaultHooks>, EngineError> {
        self.assemble(DefaultHooks)
    }
}

impl<Ctx, P, H> TurnEngineBuilder<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: EngineHooks,
{
    /// Build the engine with the hooks set through
    /// [`TurnEngineBuilder::hooks`].
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if hooks, the provider or the
    /// application context are missing, or the configuration is invalid.
    pub fn build_with_hooks(mut self) -> Result<TurnEngine<Ctx, P, H>, EngineError> {
        let hooks = self
            .hooks
            .take()
            .ok_or_else(|| EngineError::Configuration("hooks are required".into()))?;
        self.assemble(hooks)
    }
}
