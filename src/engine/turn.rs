use super::TurnEngine;
use super::llm::call_llm_with_retry;
use super::types::{Outstanding, PendingBatch, SuspendedTurn, TurnEnd, TurnMode, TurnProgress};
use crate::context::{TokenEstimator, Turn};
use crate::dispatch::{BatchOutcome, Invocation, Suspension, ToolDispatcher, collect_invocations};
use crate::error::EngineError;
use crate::events::AgentEvent;
use crate::hooks::EngineHooks;
use crate::llm::{ChatRequest, ChatResponse, LlmProvider};
use crate::stores::{ContinuationToken, StoredContinuation};
use crate::types::{PendingInteraction, TerminationReason, TokenUsage, ToolResult, TurnResult};
use log::{debug, info, warn};
use std::time::Instant;

impl<Ctx, P, H> TurnEngine<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: EngineHooks,
{
    /// Run one user turn: the provider is called until the assistant stops
    /// issuing tool calls, a tool suspends, or `max_iterations` is reached.
    ///
    /// A continuation still outstanding from an earlier turn is invalidated
    /// and its calls answered with "cancelled" results.
    ///
    /// # Errors
    /// Returns [`EngineError::Provider`] when the provider fails (after
    /// retries for transient failures) and [`EngineError::Store`] when a
    /// suspension cannot be stored. Turns appended before the failure stay
    /// in the conversation.
    pub async fn run_user_turn(&mut self, text: impl Into<String>) -> Result<TurnResult, EngineError> {
        let started = Instant::now();
        self.invalidate_outstanding("superseded by a new user message")
            .await;
        self.state.clear_transient();
        self.state.push(Turn::user(text));
        debug!("User turn started session_id={}", self.session_id);

        let mut progress = TurnProgress::default();
        let end = self.drive(&mut progress, TurnMode::Interactive, None).await;
        self.finish_interactive(end, progress, started).await
    }

    /// The tool-call loop shared by user turns, agent steps and resumes.
    ///
    /// `pending` holds invocations to dispatch before the next provider call.
    pub(super) async fn drive(
        &mut self,
        progress: &mut TurnProgress,
        mode: TurnMode,
        mut pending: Option<PendingBatch>,
    ) -> Result<TurnEnd, EngineError> {
        loop {
            let batch = if let Some(batch) = pending.take() {
                batch
            } else {
                if progress.iterations >= self.config.max_iterations {
                    return Ok(TurnEnd::IterationLimit {
                        text: self.last_assistant_text(),
                    });
                }
                self.repair_unanswered();
                let earlier = self.earlier_named_content();
                let response = self.call_provider(progress).await?;
                let text = response.text();
                let tool_calls = response.tool_calls();
                let invocations = collect_invocations(&tool_calls, &text, &earlier);
                let structured = !tool_calls.is_empty();

                self.state.push(Turn::assistant(text.clone(), tool_calls));

                if invocations.is_empty() {
                    return Ok(TurnEnd::Complete { text });
                }
                debug!(
                    "Dispatching invocations count={} structured={structured}",
                    invocations.len()
                );
                PendingBatch {
                    invocations,
                    structured,
                    auto_submit: false,
                }
            };

            let outcome = self.dispatch(batch.invocations).await;
            for (call_id, result) in &outcome.results {
                self.state.push_tool_result(call_id.clone(), result);
            }
            let auto_submit = batch.auto_submit || outcome.auto_submit;

            if let Some(suspension) = outcome.suspension {
                return Ok(TurnEnd::Suspended {
                    suspension,
                    structured: batch.structured,
                    auto_submit,
                });
            }
            if batch.structured {
                continue;
            }
            if auto_submit && self.auto_submit_allowed(progress, mode).await {
                if progress.iterations >= self.config.max_iterations {
                    return Ok(TurnEnd::IterationLimit {
                        text: self.last_assistant_text(),
                    });
                }
                debug!("Auto-submitting follow-up turn");
                self.state.push(Turn::user(""));
                continue;
            }
            return Ok(TurnEnd::Complete {
                text: self.last_assistant_text(),
            });
        }
    }

    pub(super) async fn dispatch(&self, invocations: Vec<Invocation>) -> BatchOutcome {
        ToolDispatcher::new(
            &self.tools,
            &self.tool_context,
            &self.events,
            self.interaction_handler.as_deref(),
        )
        .dispatch(invocations)
        .await
    }

    async fn call_provider(&self, progress: &mut TurnProgress) -> Result<ChatResponse, EngineError> {
        let tools = self.tools.to_llm_tools();
        let request = ChatRequest {
            system: self.state.system_with_transient(&self.config.system_prompt),
            messages: self.state.turns().to_vec(),
            tools: (!tools.is_empty()).then_some(tools),
            max_tokens: self.config.max_tokens,
            model: self.config.model.clone(),
        };

        progress.iterations += 1;
        self.events
            .emit(AgentEvent::TurnStart {
                session_id: self.session_id.clone(),
                iteration: progress.iterations,
            })
            .await;

        let message_id = uuid::Uuid::new_v4().to_string();
        let response = call_llm_with_retry(
            self.provider.as_ref(),
            &request,
            &self.config,
            &self.events,
            &self.cancel,
            &message_id,
        )
        .await?;
        self.events
            .emit(AgentEvent::text(&message_id, response.text()))
            .await;

        progress.provider_calls += 1;
        let usage: TokenUsage = response.usage.into();
        progress.usage.add(&usage);
        self.events
            .emit(AgentEvent::TurnComplete {
                iteration: progress.iterations,
                usage,
            })
            .await;
        Ok(response)
    }

    /// Input-size gate for auto-submit follow-ups.
    ///
    /// Interactive turns skip the follow-up when the next request is
    /// estimated above `auto_submit_token_limit`; agent steps always send it.
    async fn auto_submit_allowed(&self, progress: &mut TurnProgress, mode: TurnMode) -> bool {
        if mode.is_agent() {
            return true;
        }
        let Some(limit) = self.config.auto_submit_token_limit else {
            return true;
        };
        let system = self.state.system_with_transient(&self.config.system_prompt);
        let estimated_tokens = TokenEstimator::estimate_request(&system, self.state.turns());
        if estimated_tokens <= limit {
            return true;
        }

        warn!("Auto-submit skipped estimated_tokens={estimated_tokens} limit={limit}");
        progress.auto_submit_skipped = true;
        self.events
            .emit(AgentEvent::AutoSubmitSkipped {
                estimated_tokens,
                limit,
            })
            .await;
        false
    }

    pub(super) async fn finish_interactive(
        &mut self,
        end: Result<TurnEnd, EngineError>,
        progress: TurnProgress,
        started: Instant,
    ) -> Result<TurnResult, EngineError> {
        match end {
            Ok(TurnEnd::Complete { text }) => {
                Ok(self.complete(&text, TerminationReason::Done, &progress, started).await)
            }
            Ok(TurnEnd::IterationLimit { text }) => {
                warn!(
                    "Turn stopped at iteration limit max_iterations={}",
                    self.config.max_iterations
                );
                Ok(self
                    .complete(&text, TerminationReason::IterationLimit, &progress, started)
                    .await)
            }
            Ok(TurnEnd::Suspended {
                suspension,
                structured,
                auto_submit,
            }) => {
                self.suspend(suspension, structured, auto_submit, TurnMode::Interactive, &progress)
                    .await
            }
            Err(EngineError::Cancelled(reason)) => {
                info!("Turn cancelled session_id={} reason={reason}", self.session_id);
                self.rearm_cancel();
                let text = self.last_assistant_text();
                Ok(self
                    .complete(&text, TerminationReason::Cancelled, &progress, started)
                    .await)
            }
            Err(e) => Err(e),
        }
    }

    /// Final result of an operation; emits `Done`.
    pub(super) async fn complete(
        &self,
        text: &str,
        termination_reason: TerminationReason,
        progress: &TurnProgress,
        started: Instant,
    ) -> TurnResult {
        self.events
            .emit(AgentEvent::Done {
                session_id: self.session_id.clone(),
                termination_reason,
                total_usage: progress.usage.clone(),
                provider_calls: progress.provider_calls,
                duration: started.elapsed(),
            })
            .await;
        debug!(
            "Operation finished session_id={} reason={termination_reason:?} provider_calls={}",
            self.session_id, progress.provider_calls
        );
        self.result(text, termination_reason, progress)
    }

    pub(super) fn result(
        &self,
        text: &str,
        termination_reason: TerminationReason,
        progress: &TurnProgress,
    ) -> TurnResult {
        TurnResult {
            text: self.sentinels.render(text, self.display_mode),
            usage: progress.usage.clone(),
            cost: self
                .config
                .pricing
                .as_ref()
                .map_or(0.0, |pricing| progress.usage.cost(pricing)),
            termination_reason,
            pending: None,
            provider_calls: progress.provider_calls,
            auto_submit_skipped: progress.auto_submit_skipped,
            error: None,
        }
    }

    /// Park the rest of a turn behind a fresh token.
    pub(super) async fn suspend(
        &mut self,
        suspension: Suspension,
        structured: bool,
        auto_submit: bool,
        mode: TurnMode,
        progress: &TurnProgress,
    ) -> Result<TurnResult, EngineError> {
        let Suspension {
            call,
            request,
            queued,
        } = suspension;
        let suspended = SuspendedTurn {
            call,
            queued,
            structured,
            auto_submit,
            mode,
            progress: progress.clone(),
            transient: self.state.transient().to_vec(),
        };
        let call_ids = suspended.call_ids();
        let tool_call_id = suspended.call.invocation.call_id.clone();
        let tool_name = suspended.call.tool_name.clone();

        let token = ContinuationToken::new();
        let stored = serde_json::to_value(&suspended)
            .map_err(|e| EngineError::Store(format!("cannot serialize suspended turn: {e}")));
        let stored = match stored {
            Ok(state) => {
                let entry = StoredContinuation::new(
                    state,
                    self.session_id.as_str(),
                    self.config.continuation_ttl(),
                );
                self.store
                    .put(&token, entry)
                    .await
                    .map_err(|e| EngineError::Store(format!("{e:#}")))
            }
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!("Could not store continuation tool={tool_name} call_id={tool_call_id}: {e}");
            self.answer_calls(&call_ids, "the interaction could not be stored");
            return Err(e);
        }

        info!(
            "Turn suspended session_id={} tool={tool_name} call_id={tool_call_id} token={token}",
            self.session_id
        );
        self.outstanding = Some(Outstanding {
            token: token.clone(),
            call_ids,
        });
        self.events
            .emit(AgentEvent::InteractionRequired {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                kind: request.kind,
                spec: request.spec.clone(),
                token: Some(token.clone()),
            })
            .await;

        let text = self.last_assistant_text();
        let mut result = self.result(&text, TerminationReason::Suspended, progress);
        result.pending = Some(PendingInteraction {
            kind: request.kind,
            spec: request.spec,
            token,
            tool_call_id,
            tool_name,
        });
        Ok(result)
    }

    /// Append an error result for every listed call the latest assistant
    /// turn has not had answered yet.
    pub(super) fn answer_calls(&mut self, call_ids: &[String], reason: &str) {
        let missing: Vec<String> = {
            let answered = self.state.answered_ids();
            call_ids
                .iter()
                .filter(|id| !answered.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for call_id in missing {
            self.state.push_tool_result(call_id, &ToolResult::error(reason));
        }
    }

    /// Every structured call must be answered before the provider sees the
    /// conversation again.
    fn repair_unanswered(&mut self) {
        let unanswered: Vec<String> = self
            .state
            .unanswered_calls()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        if !unanswered.is_empty() {
            warn!("Answering calls left without a result count={}", unanswered.len());
            self.answer_calls(&unanswered, "no result was recorded for this call");
        }
    }

    /// Drop the outstanding continuation, if any, and answer its calls.
    pub(super) async fn invalidate_outstanding(&mut self, reason: &str) {
        let Some(outstanding) = self.outstanding.take() else {
            return;
        };
        match self.store.delete(&outstanding.token).await {
            Ok(true) => info!(
                "Continuation invalidated token={} reason={reason}",
                outstanding.token
            ),
            Ok(false) => debug!("Continuation already gone token={}", outstanding.token),
            Err(e) => warn!(
                "Could not delete continuation token={}: {e:#}",
                outstanding.token
            ),
        }
        self.answer_calls(&outstanding.call_ids, &format!("cancelled: {reason}"));
        self.events
            .emit(AgentEvent::ContinuationCancelled {
                tool_call_id: outstanding.call_ids.first().cloned().unwrap_or_default(),
                token: outstanding.token,
                reason: reason.to_string(),
            })
            .await;
    }
}
