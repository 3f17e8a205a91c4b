use super::TurnEngine;
use super::types::{PendingBatch, SuspendedTurn, TurnEnd, TurnMode, TurnProgress};
use crate::dispatch::{InvocationOutcome, Suspension, SuspendedCall, ToolDispatcher};
use crate::error::EngineError;
use crate::events::AgentEvent;
use crate::hooks::EngineHooks;
use crate::interaction::InteractionResponse;
use crate::llm::LlmProvider;
use crate::stores::ContinuationToken;
use crate::types::TurnResult;
use log::info;
use std::time::Instant;

impl<Ctx, P, H> TurnEngine<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: EngineHooks,
{
    /// Answer a pending interaction and continue the suspended turn.
    ///
    /// The token is consumed before the tool runs, so a replay fails even
    /// when two resumes race. If the tool suspends again the result carries
    /// a new token. Otherwise the invocations queued behind it run and the
    /// turn continues as if it had never stopped.
    ///
    /// A token from an agent loop finishes only the interrupted step; use
    /// [`TurnEngine::resume_agent_loop`] to run the remaining steps too.
    ///
    /// # Errors
    /// Returns [`EngineError::InteractionExpired`] for an unknown, consumed,
    /// expired or foreign token, and the errors of
    /// [`TurnEngine::run_user_turn`] for the continued turn.
    pub async fn resume(
        &mut self,
        token: &ContinuationToken,
        response: InteractionResponse,
    ) -> Result<TurnResult, EngineError> {
        let started = Instant::now();
        let suspended = self.take_continuation(token).await?;
        let mode = suspended.mode;
        let (end, progress) = self.continue_suspended(suspended, response).await;

        match mode {
            TurnMode::Interactive => self.finish_interactive(end, progress, started).await,
            TurnMode::Agent { step, steps } => {
                let outcome = self.finish_step(end, progress, step, steps, started).await;
                Ok(self.stop_after_step(outcome, step, steps, started).await)
            }
        }
    }

    /// Discard a pending interaction without running its tool.
    ///
    /// The suspended call and every call queued behind it get a "cancelled"
    /// error result so the conversation stays well-formed. Rolling back
    /// anything the tool staged is up to the tool.
    ///
    /// # Errors
    /// Returns [`EngineError::InteractionExpired`] for an unknown, consumed,
    /// expired or foreign token.
    pub async fn cancel(&mut self, token: &ContinuationToken) -> Result<(), EngineError> {
        let suspended = self.take_continuation(token).await?;
        let reason = "cancelled by the caller";
        self.answer_calls(&suspended.call_ids(), reason);
        info!(
            "Continuation cancelled token={token} tool={} call_id={}",
            suspended.call.tool_name, suspended.call.invocation.call_id
        );
        self.events
            .emit(AgentEvent::ContinuationCancelled {
                token: token.clone(),
                tool_call_id: suspended.call.invocation.call_id,
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }

    /// Invalidate every continuation this engine handed out and has not seen
    /// resolved. In-flight provider calls are cancelled through
    /// [`TurnEngine::cancel_handle`].
    pub async fn cancel_session(&mut self) {
        self.invalidate_outstanding("session cancelled").await;
    }

    /// Consume a token and decode the turn parked behind it.
    pub(super) async fn take_continuation(
        &mut self,
        token: &ContinuationToken,
    ) -> Result<SuspendedTurn, EngineError> {
        let entry = self
            .store
            .take(token, self.session_id.as_str())
            .await
            .map_err(|e| EngineError::Store(format!("{e:#}")))?;
        let ours = self.outstanding.as_ref().is_some_and(|o| &o.token == token);

        let Some(entry) = entry else {
            if ours && let Some(outstanding) = self.outstanding.take() {
                self.answer_calls(&outstanding.call_ids, "cancelled: the interaction expired");
            }
            info!(
                "Continuation rejected token={token} session_id={}",
                self.session_id
            );
            return Err(EngineError::InteractionExpired(format!(
                "continuation {token} is unknown, already used, or expired"
            )));
        };
        if ours {
            self.outstanding = None;
        }

        serde_json::from_value(entry.private_state)
            .map_err(|e| EngineError::Store(format!("corrupt continuation {token}: {e}")))
    }

    /// Resume the parked tool, then dispatch whatever was queued behind it.
    pub(super) async fn continue_suspended(
        &mut self,
        suspended: SuspendedTurn,
        response: InteractionResponse,
    ) -> (Result<TurnEnd, EngineError>, TurnProgress) {
        let SuspendedTurn {
            call,
            queued,
            structured,
            auto_submit,
            mode,
            mut progress,
            transient,
        } = suspended;
        self.state.set_transient(transient);

        info!(
            "Resuming tool={} call_id={} session_id={}",
            call.tool_name, call.invocation.call_id, self.session_id
        );
        let call_id = call.invocation.call_id.clone();
        let end = match self.resume_call(call, response).await {
            InvocationOutcome::Finished(result) => {
                let auto_submit = auto_submit || (result.success && result.auto_submit);
                self.state.push_tool_result(call_id, &result);
                let pending = PendingBatch {
                    invocations: queued,
                    structured,
                    auto_submit,
                };
                self.drive(&mut progress, mode, Some(pending)).await
            }
            InvocationOutcome::Suspended { call, request } => Ok(TurnEnd::Suspended {
                suspension: Suspension {
                    call,
                    request,
                    queued,
                },
                structured,
                auto_submit,
            }),
        };
        (end, progress)
    }

    async fn resume_call(&self, call: SuspendedCall, response: InteractionResponse) -> InvocationOutcome {
        ToolDispatcher::new(
            &self.tools,
            &self.tool_context,
            &self.events,
            self.interaction_handler.as_deref(),
        )
        .resume(call, response)
        .await
    }
}
