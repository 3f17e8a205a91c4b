//! Stepwise tools and the registry the dispatcher resolves against.
//!
//! - [`Tool`] - a tool with a two-phase `start`/`resume` contract
//! - [`ToolOutcome`] - `Completed`, `Suspended` or `Failed`
//! - [`ToolName`] - marker trait for strongly-typed tool names
//! - [`ToolRegistry`] - case-insensitive, alias-aware catalog
//! - [`ToolContext`] - what a tool sees while it runs
//!
//! # Implementing a Tool
//!
//! ```ignore
//! struct DeleteFile;
//!
//! impl Tool<AppCtx> for DeleteFile {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("delete") }
//!     fn display_name(&self) -> &'static str { "Delete File" }
//!     fn description(&self) -> &'static str { "Delete a file after confirmation" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!     fn tier(&self) -> ToolTier { ToolTier::Mutate }
//!
//!     async fn start(&self, _ctx: &ToolContext<AppCtx>, input: ToolInput) -> Result<ToolOutcome> {
//!         let request = ConfirmationRequest::new("delete", "Delete a file", &input.arguments);
//!         Ok(ToolOutcome::Suspended(InteractionRequest::confirm(&request, input.arguments)))
//!     }
//!
//!     async fn resume(
//!         &self,
//!         _ctx: &ToolContext<AppCtx>,
//!         state: Value,
//!         response: InteractionResponse,
//!     ) -> Result<ToolOutcome> {
//!         if response.confirmed() != Some(true) {
//!             return Ok(ToolOutcome::failed("deletion declined"));
//!         }
//!         // ... delete state["path"] ...
//!         Ok(ToolOutcome::completed(ToolResult::success("deleted")))
//!     }
//! }
//! ```

use crate::events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
use crate::interaction::{InteractionRequest, InteractionResponse};
use crate::llm::ToolSpec;
use crate::types::{SessionId, ToolResult, ToolTier, WritePolicy};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Marker trait for tool names.
///
/// The string form sent to the model is the serde serialization.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// String form of a tool name via serde.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(e) => {
            log::error!("Tool name failed to serialize: {e}");
            String::new()
        }
    }
}

/// Tool name chosen at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

/// Arguments and optional body content for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ToolInput {
    /// Always a JSON object
    pub arguments: Value,
    /// Body of a text-embedded invocation, if any
    pub content: Option<String>,
}

impl ToolInput {
    #[must_use]
    pub const fn new(arguments: Value) -> Self {
        Self {
            arguments,
            content: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Result of `start` or `resume`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(ToolResult),
    /// The tool needs caller input before it can finish
    Suspended(InteractionRequest),
    /// A model-correctable failure
    Failed(String),
}

impl ToolOutcome {
    #[must_use]
    pub const fn completed(result: ToolResult) -> Self {
        Self::Completed(result)
    }

    #[must_use]
    pub const fn suspend(request: InteractionRequest) -> Self {
        Self::Suspended(request)
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a tool sees while it runs.
pub struct ToolContext<Ctx> {
    /// Application-specific context (e.g. a workspace root, a db handle)
    pub app: Ctx,
    pub metadata: HashMap<String, Value>,
    write_policy: WritePolicy,
    session_id: SessionId,
    event_tx: Option<mpsc::Sender<AgentEventEnvelope>>,
    event_seq: Option<SequenceCounter>,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub fn new(app: Ctx) -> Self {
        Self {
            app,
            metadata: HashMap::new(),
            write_policy: WritePolicy::Allow,
            session_id: SessionId::new(),
            event_tx: None,
            event_seq: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub const fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_event_tx(
        mut self,
        tx: mpsc::Sender<AgentEventEnvelope>,
        seq: SequenceCounter,
    ) -> Self {
        self.event_tx = Some(tx);
        self.event_seq = Some(seq);
        self
    }

    /// Mutating tools must not commit side effects under [`WritePolicy::DryRun`].
    #[must_use]
    pub const fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.write_policy == WritePolicy::DryRun
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Emit an event on the engine's channel, if any.
    ///
    /// Uses `try_send` so the tool never blocks on a slow consumer; the
    /// event is dropped if the channel is full.
    pub fn emit_event(&self, event: AgentEvent) {
        if let Some((tx, seq)) = self.event_tx.as_ref().zip(self.event_seq.as_ref()) {
            let _ = tx.try_send(AgentEventEnvelope::wrap(event, seq));
        }
    }
}

/// A tool the model can invoke.
///
/// `start` runs when the model calls the tool. A tool that needs caller input
/// returns [`ToolOutcome::Suspended`] with an [`InteractionRequest`] whose
/// `private_state` carries everything `resume` needs. The engine keeps no
/// live reference to the tool between the two calls.
pub trait Tool<Ctx>: Send + Sync {
    type Name: ToolName;

    fn name(&self) -> Self::Name;

    /// Alternate names the dispatcher also accepts.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    fn tier(&self) -> ToolTier {
        ToolTier::Observe
    }

    /// # Errors
    /// An error is reported to the model as a failed tool result.
    fn start(
        &self,
        ctx: &ToolContext<Ctx>,
        input: ToolInput,
    ) -> impl Future<Output = Result<ToolOutcome>> + Send;

    /// Continue a suspended invocation with the caller's answer.
    ///
    /// # Errors
    /// An error is reported to the model as a failed tool result. The default
    /// fails, for tools that never suspend.
    fn resume(
        &self,
        _ctx: &ToolContext<Ctx>,
        _state: Value,
        _response: InteractionResponse,
    ) -> impl Future<Output = Result<ToolOutcome>> + Send {
        async { Err::<ToolOutcome, _>(anyhow!("tool does not support resume")) }
    }
}

/// Object-safe view of a [`Tool`] for registry storage.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    fn name_str(&self) -> &str;
    fn aliases(&self) -> &'static [&'static str];
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn tier(&self) -> ToolTier;
    async fn start(&self, ctx: &ToolContext<Ctx>, input: ToolInput) -> Result<ToolOutcome>;
    async fn resume(
        &self,
        ctx: &ToolContext<Ctx>,
        state: Value,
        response: InteractionResponse,
    ) -> Result<ToolOutcome>;
}

struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    _marker: PhantomData<Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        Self {
            inner: tool,
            name_cache,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn aliases(&self) -> &'static [&'static str] {
        self.inner.aliases()
    }

    fn display_name(&self) -> &'static str {
        self.inner.display_name()
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn tier(&self) -> ToolTier {
        self.inner.tier()
    }

    async fn start(&self, ctx: &ToolContext<Ctx>, input: ToolInput) -> Result<ToolOutcome> {
        self.inner.start(ctx, input).await
    }

    async fn resume(
        &self,
        ctx: &ToolContext<Ctx>,
        state: Value,
        response: InteractionResponse,
    ) -> Result<ToolOutcome> {
        self.inner.resume(ctx, state, response).await
    }
}

struct Entry<Ctx> {
    name: String,
    tool: Arc<dyn ErasedTool<Ctx>>,
    fixed_args: Map<String, Value>,
}

impl<Ctx> Clone for Entry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tool: Arc::clone(&self.tool),
            fixed_args: self.fixed_args.clone(),
        }
    }
}

/// A registry hit: the tool plus any arguments pinned at registration.
pub struct ResolvedTool<'a, Ctx> {
    pub name: &'a str,
    pub tool: &'a Arc<dyn ErasedTool<Ctx>>,
    fixed_args: &'a Map<String, Value>,
}

impl<Ctx> ResolvedTool<'_, Ctx> {
    /// Merge pinned arguments over the caller's. Pinned values win.
    #[must_use]
    pub fn apply_fixed_args(&self, mut arguments: Map<String, Value>) -> Map<String, Value> {
        for (key, value) in self.fixed_args {
            if let Some(previous) = arguments.insert(key.clone(), value.clone())
                && &previous != value
            {
                log::warn!(
                    "Pinned argument overrides caller value tool={} key={key}",
                    self.name
                );
            }
        }
        arguments
    }
}

/// Catalog of tools, built once and shared by reference.
///
/// Lookup ignores case and accepts aliases. Tools registered with
/// [`ToolRegistry::register_pinned`] always receive their pinned arguments.
pub struct ToolRegistry<Ctx> {
    entries: HashMap<String, Entry<Ctx>>,
    aliases: HashMap<String, String>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            aliases: self.aliases.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        self.insert(name, Arc::new(wrapper), Map::new())
    }

    /// Register a tool whose arguments always include `fixed_args`.
    ///
    /// Non-object `fixed_args` are ignored with a warning.
    pub fn register_pinned<T>(&mut self, tool: T, fixed_args: Value) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        self.insert(name, Arc::new(wrapper), object_or_empty(fixed_args))
    }

    /// Register a tool under another name with pinned arguments, e.g. one
    /// search tool exposed as `search_docs` with `{"backend": "docs"}`.
    pub fn register_pinned_as<T>(
        &mut self,
        name: impl Into<String>,
        tool: T,
        fixed_args: Value,
    ) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(ToolWrapper::new(tool)),
            object_or_empty(fixed_args),
        )
    }

    fn insert(
        &mut self,
        name: String,
        tool: Arc<dyn ErasedTool<Ctx>>,
        fixed_args: Map<String, Value>,
    ) -> &mut Self {
        let key = normalize(&name);
        for alias in tool.aliases() {
            let alias = normalize(alias);
            if let Some(existing) = self.aliases.get(&alias)
                && existing != &key
            {
                log::warn!("Alias '{alias}' reassigned from '{existing}' to '{key}'");
            }
            self.aliases.insert(alias, key.clone());
        }
        if self.entries.contains_key(&key) {
            log::warn!("Tool '{name}' registered twice; keeping the latest");
        }
        self.entries.insert(
            key,
            Entry {
                name,
                tool,
                fixed_args,
            },
        );
        self
    }

    /// Look up a tool by name or alias, ignoring case.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ResolvedTool<'_, Ctx>> {
        let key = normalize(name);
        let entry = self.entries.get(&key).or_else(|| {
            self.aliases
                .get(&key)
                .and_then(|target| self.entries.get(target))
        })?;
        Some(ResolvedTool {
            name: &entry.name,
            tool: &entry.tool,
            fixed_args: &entry.fixed_args,
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.resolve(name).map(|r| r.tool)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove tools whose registered name fails the predicate.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.entries.retain(|_, entry| predicate(&entry.name));
        let entries = &self.entries;
        self.aliases.retain(|_, target| entries.contains_key(target));
    }

    /// Tool specs for the provider, sorted by name.
    ///
    /// Pinned arguments are removed from the advertised schema; the model
    /// cannot change them anyway.
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<ToolSpec> {
        let mut tools: Vec<_> = self
            .entries
            .values()
            .map(|entry| ToolSpec {
                name: entry.name.clone(),
                description: entry.tool.description().to_string(),
                input_schema: hide_pinned(entry.tool.input_schema(), &entry.fixed_args),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            log::warn!("Pinned arguments must be a JSON object, ignoring {other}");
            Map::new()
        }
    }
}

fn hide_pinned(mut schema: Value, fixed_args: &Map<String, Value>) -> Value {
    if fixed_args.is_empty() {
        return schema;
    }
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for key in fixed_args.keys() {
            properties.remove(key);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|r| r.as_str().is_none_or(|r| !fixed_args.contains_key(r)));
    }
    schema
}
