//! Resolves and runs the tool invocations of one assistant response.
//!
//! Invocations come from structured tool calls first, then from
//! text-embedded blocks in text order. They run strictly one after another.
//! Every invocation that runs to an end yields exactly one `(call_id,
//! ToolResult)` pair, in invocation order. Unknown tools, malformed
//! arguments, policy refusals and tool errors all become error results the
//! model can react to; none of them abort the batch.
//!
//! A suspension stops the batch. The suspended call and the invocations
//! behind it are handed back so the engine can park them behind a token.

use crate::context::ToolCall;
use crate::events::{AgentEvent, EventSink};
use crate::hooks::{EngineHooks, ToolDecision};
use crate::interaction::{InteractionHandler, InteractionRequest, InteractionResponse};
use crate::pseudo_tools::{self, NamedContent, PseudoCall};
use crate::tools::{ResolvedTool, ToolContext, ToolInput, ToolOutcome, ToolRegistry};
use crate::types::{ToolResult, ToolTier, WritePolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationSource {
    /// Provider-native tool call
    Structured,
    /// Text-embedded action block
    Pseudo,
}

/// One tool invocation, ready to run or waiting in a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub source: InvocationSource,
    /// Problem found while extracting the invocation; it is reported
    /// instead of running the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Invocation {
    #[must_use]
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            content: None,
            source: InvocationSource::Structured,
            error: None,
        }
    }

    #[must_use]
    pub fn from_pseudo(call: PseudoCall) -> Self {
        Self {
            call_id: call.id,
            name: call.name,
            arguments: Value::Object(call.arguments),
            content: call.content,
            source: InvocationSource::Pseudo,
            error: call.error,
        }
    }
}

/// All invocations of one assistant response, in execution order.
///
/// `earlier` holds named content from previous assistant turns.
#[must_use]
pub fn collect_invocations(
    tool_calls: &[ToolCall],
    text: &str,
    earlier: &NamedContent,
) -> Vec<Invocation> {
    tool_calls
        .iter()
        .map(Invocation::from_call)
        .chain(
            pseudo_tools::parse(text, earlier)
                .into_iter()
                .map(Invocation::from_pseudo),
        )
        .collect()
}

/// A call parked until the caller answers its interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedCall {
    /// Canonical tool name from the registry
    pub tool_name: String,
    /// The invocation as it was started, with pinned arguments merged in
    pub invocation: Invocation,
    /// The tool's private state from its interaction request
    pub tool_state: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Finished(ToolResult),
    Suspended {
        call: SuspendedCall,
        request: InteractionRequest,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub call: SuspendedCall,
    pub request: InteractionRequest,
    /// Invocations after the suspended one; not started
    pub queued: Vec<Invocation>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub results: Vec<(String, ToolResult)>,
    /// Some finished result asked for a follow-up assistant turn
    pub auto_submit: bool,
    pub suspension: Option<Suspension>,
}

#[allow(clippy::cast_possible_truncation)]
const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

pub(crate) struct ToolDispatcher<'a, Ctx, H> {
    registry: &'a ToolRegistry<Ctx>,
    tool_context: &'a ToolContext<Ctx>,
    events: &'a EventSink<H>,
    handler: Option<&'a dyn InteractionHandler>,
}

impl<'a, Ctx, H> ToolDispatcher<'a, Ctx, H>
where
    Ctx: Send + Sync + 'static,
    H: EngineHooks,
{
    pub(crate) const fn new(
        registry: &'a ToolRegistry<Ctx>,
        tool_context: &'a ToolContext<Ctx>,
        events: &'a EventSink<H>,
        handler: Option<&'a dyn InteractionHandler>,
    ) -> Self {
        Self {
            registry,
            tool_context,
            events,
            handler,
        }
    }

    /// Run invocations in order until they finish or one suspends.
    pub(crate) async fn dispatch(&self, invocations: Vec<Invocation>) -> BatchOutcome {
        let mut batch = BatchOutcome::default();
        let mut pending = invocations.into_iter();

        while let Some(invocation) = pending.next() {
            match self.run(&invocation).await {
                InvocationOutcome::Finished(result) => {
                    batch.auto_submit |= result.success && result.auto_submit;
                    batch.results.push((invocation.call_id, result));
                }
                InvocationOutcome::Suspended { call, request } => {
                    let queued: Vec<Invocation> = pending.by_ref().collect();
                    log::debug!(
                        "Batch suspended tool={} call_id={} queued={}",
                        call.tool_name,
                        call.invocation.call_id,
                        queued.len()
                    );
                    batch.suspension = Some(Suspension {
                        call,
                        request,
                        queued,
                    });
                    break;
                }
            }
        }

        batch
    }

    /// Validate, resolve and start one invocation.
    pub(crate) async fn run(&self, invocation: &Invocation) -> InvocationOutcome {
        let started = Instant::now();

        let Some(resolved) = self.registry.resolve(&invocation.name) else {
            let mut available: Vec<String> = self
                .registry
                .to_llm_tools()
                .into_iter()
                .map(|t| t.name)
                .collect();
            available.sort();
            let message = format!(
                "Unknown tool: '{}'. Available tools: {}",
                invocation.name,
                available.join(", ")
            );
            return self
                .reject(invocation, &invocation.name, &invocation.name, message, started)
                .await;
        };
        let tool_name = resolved.name;
        let display_name = resolved.tool.display_name();

        if let Some(error) = &invocation.error {
            let message = format!("Invalid invocation of '{tool_name}': {error}");
            return self
                .reject(invocation, tool_name, display_name, message, started)
                .await;
        }

        let arguments = match &invocation.arguments {
            Value::Object(map) => resolved.apply_fixed_args(map.clone()),
            Value::Null => resolved.apply_fixed_args(Map::new()),
            Value::String(raw) => {
                let message = format!(
                    "Invalid arguments for '{tool_name}': not valid JSON: {raw}. \
                     Send the arguments as a JSON object."
                );
                return self
                    .reject(invocation, tool_name, display_name, message, started)
                    .await;
            }
            other => {
                let message = format!(
                    "Invalid arguments for '{tool_name}': expected a JSON object, got {other}"
                );
                return self
                    .reject(invocation, tool_name, display_name, message, started)
                    .await;
            }
        };
        let arguments = Value::Object(arguments);

        let tier = resolved.tool.tier();
        if tier == ToolTier::Mutate && self.tool_context.write_policy() == WritePolicy::Deny {
            let message = format!(
                "'{tool_name}' modifies state and the write policy is deny. \
                 Use read-only tools instead."
            );
            return self
                .reject(invocation, tool_name, display_name, message, started)
                .await;
        }

        if let ToolDecision::Block(reason) = self
            .events
            .hooks()
            .pre_tool_use(tool_name, &arguments, tier)
            .await
        {
            let message = format!("'{tool_name}' was blocked: {reason}");
            return self
                .reject(invocation, tool_name, display_name, message, started)
                .await;
        }

        self.events
            .emit(AgentEvent::tool_call_start(
                &invocation.call_id,
                tool_name,
                display_name,
                arguments.clone(),
                tier,
            ))
            .await;

        let invocation = Invocation {
            name: tool_name.to_string(),
            arguments: arguments.clone(),
            ..invocation.clone()
        };
        let input = ToolInput {
            arguments,
            content: invocation.content.clone(),
        };

        let outcome = resolved.tool.start(self.tool_context, input).await;
        self.settle(&resolved, invocation, outcome, started).await
    }

    /// Resume a parked call with the caller's answer.
    pub(crate) async fn resume(
        &self,
        call: SuspendedCall,
        response: InteractionResponse,
    ) -> InvocationOutcome {
        let started = Instant::now();
        let Some(resolved) = self.registry.resolve(&call.tool_name) else {
            let message = format!("'{}' is no longer available", call.tool_name);
            return self
                .reject(&call.invocation, &call.tool_name, &call.tool_name, message, started)
                .await;
        };

        self.events
            .emit(AgentEvent::Resumed {
                tool_call_id: call.invocation.call_id.clone(),
                tool_name: call.tool_name.clone(),
            })
            .await;

        let outcome = resolved
            .tool
            .resume(self.tool_context, call.tool_state, response)
            .await;
        self.settle(&resolved, call.invocation, outcome, started).await
    }

    /// Turn a tool outcome into a finished result or a suspension.
    ///
    /// With an interaction handler installed, suspensions are answered
    /// in-process and the tool resumed until it finishes.
    async fn settle(
        &self,
        resolved: &ResolvedTool<'_, Ctx>,
        invocation: Invocation,
        mut outcome: anyhow::Result<ToolOutcome>,
        started: Instant,
    ) -> InvocationOutcome {
        let result = loop {
            match outcome {
                Ok(ToolOutcome::Completed(result)) => break result,
                Ok(ToolOutcome::Failed(message)) => break ToolResult::error(message),
                Err(e) => {
                    log::warn!(
                        "Tool error tool={} call_id={}: {e:#}",
                        resolved.name,
                        invocation.call_id
                    );
                    break ToolResult::error(format!("Tool error: {e:#}"));
                }
                Ok(ToolOutcome::Suspended(request)) => {
                    let Some(handler) = self.handler else {
                        return InvocationOutcome::Suspended {
                            call: SuspendedCall {
                                tool_name: resolved.name.to_string(),
                                invocation,
                                tool_state: request.private_state.clone(),
                            },
                            request,
                        };
                    };
                    self.events
                        .emit(AgentEvent::InteractionRequired {
                            tool_call_id: invocation.call_id.clone(),
                            tool_name: resolved.name.to_string(),
                            kind: request.kind,
                            spec: request.spec.clone(),
                            token: None,
                        })
                        .await;
                    outcome = match handler.handle(request.kind, &request.spec).await {
                        Ok(response) => {
                            resolved
                                .tool
                                .resume(self.tool_context, request.private_state, response)
                                .await
                        }
                        Err(e) => Ok(ToolOutcome::Failed(format!("Interaction failed: {e:#}"))),
                    };
                }
            }
        };

        let result = result.with_duration(millis_to_u64(started.elapsed().as_millis()));
        self.finish(&invocation.call_id, resolved.name, resolved.tool.display_name(), result)
            .await
    }

    async fn reject(
        &self,
        invocation: &Invocation,
        tool_name: &str,
        display_name: &str,
        message: String,
        started: Instant,
    ) -> InvocationOutcome {
        log::warn!(
            "Tool call rejected tool={tool_name} call_id={}: {message}",
            invocation.call_id
        );
        let result =
            ToolResult::error(message).with_duration(millis_to_u64(started.elapsed().as_millis()));
        self.finish(&invocation.call_id, tool_name, display_name, result)
            .await
    }

    async fn finish(
        &self,
        call_id: &str,
        tool_name: &str,
        display_name: &str,
        result: ToolResult,
    ) -> InvocationOutcome {
        self.events.hooks().post_tool_use(tool_name, &result).await;
        self.events
            .emit(AgentEvent::tool_call_end(
                call_id,
                tool_name,
                display_name,
                result.clone(),
            ))
            .await;
        InvocationOutcome::Finished(result)
    }
}
