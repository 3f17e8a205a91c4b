use super::TurnEngine;
use super::helpers::step_notes;
use super::types::{TurnEnd, TurnMode, TurnProgress};
use crate::context::Turn;
use crate::error::EngineError;
use crate::events::AgentEvent;
use crate::hooks::EngineHooks;
use crate::interaction::InteractionResponse;
use crate::llm::LlmProvider;
use crate::stores::ContinuationToken;
use crate::types::{TerminationReason, TurnResult};
use log::{debug, error, info, warn};
use std::time::Instant;

/// What happens after one agent step.
pub(super) enum StepOutcome {
    /// More steps remain; carries the loop's progress so far
    Next(TurnProgress),
    Stop(TurnResult),
}

impl<Ctx, P, H> TurnEngine<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: EngineHooks,
{
    /// Run up to `steps` autonomous steps.
    ///
    /// Each step sends `prepare_step(step, steps)` as the user message, with
    /// a transient "Step i of n" note (plus a write policy note under `deny`
    /// or `dry-run`) in the system context. The loop stops early when the
    /// assistant text of a step contains a finish marker.
    ///
    /// Failures do not surface as `Err`: the result has
    /// [`TerminationReason::Aborted`], the usage accrued so far and the
    /// failure in [`TurnResult::error`].
    pub async fn run_agent_loop<F>(&mut self, steps: usize, mut prepare_step: F) -> TurnResult
    where
        F: FnMut(usize, usize) -> String + Send,
    {
        let started = Instant::now();
        self.invalidate_outstanding("superseded by an agent loop").await;
        if steps == 0 {
            let e = EngineError::Configuration("steps must be at least 1".into());
            return self.abort(&e, &TurnProgress::default(), started).await;
        }
        info!("Agent loop started session_id={} steps={steps}", self.session_id);
        self.run_steps(1, steps, &mut prepare_step, TurnProgress::default(), started)
            .await
    }

    /// Answer a pending interaction raised inside an agent loop, finish the
    /// interrupted step and run the remaining ones.
    ///
    /// A token from an interactive turn simply continues that turn.
    ///
    /// # Errors
    /// Returns [`EngineError::InteractionExpired`] for an unknown, consumed,
    /// expired or foreign token. Failures after the tool resumed are
    /// reported as an aborted [`TurnResult`].
    pub async fn resume_agent_loop<F>(
        &mut self,
        token: &ContinuationToken,
        response: InteractionResponse,
        mut prepare_step: F,
    ) -> Result<TurnResult, EngineError>
    where
        F: FnMut(usize, usize) -> String + Send,
    {
        let started = Instant::now();
        let suspended = self.take_continuation(token).await?;
        let mode = suspended.mode;
        let (end, progress) = self.continue_suspended(suspended, response).await;

        match mode {
            TurnMode::Interactive => self.finish_interactive(end, progress, started).await,
            TurnMode::Agent { step, steps } => {
                match self.finish_step(end, progress, step, steps, started).await {
                    StepOutcome::Next(progress) => Ok(self
                        .run_steps(step + 1, steps, &mut prepare_step, progress, started)
                        .await),
                    StepOutcome::Stop(result) => Ok(result),
                }
            }
        }
    }

    async fn run_steps<F>(
        &mut self,
        from: usize,
        steps: usize,
        prepare_step: &mut F,
        mut progress: TurnProgress,
        started: Instant,
    ) -> TurnResult
    where
        F: FnMut(usize, usize) -> String + Send,
    {
        let policy_note = self.config.write_policy.agent_note();

        for step in from..=steps {
            let prompt = prepare_step(step, steps);
            self.state.set_transient(step_notes(step, steps, policy_note));
            self.state.push(Turn::user(prompt));
            debug!("Agent step started step={step} steps={steps}");

            progress.iterations = 0;
            let end = self
                .drive(&mut progress, TurnMode::Agent { step, steps }, None)
                .await;
            match self.finish_step(end, progress, step, steps, started).await {
                StepOutcome::Next(next) => progress = next,
                StepOutcome::Stop(result) => return result,
            }
        }

        self.state.clear_transient();
        let text = self.last_assistant_text();
        self.complete(&text, TerminationReason::DoneByStepLimit, &progress, started)
            .await
    }

    /// Apply sentinel detection and the step limit to a finished step.
    pub(super) async fn finish_step(
        &mut self,
        end: Result<TurnEnd, EngineError>,
        progress: TurnProgress,
        step: usize,
        steps: usize,
        started: Instant,
    ) -> StepOutcome {
        let text = match end {
            Ok(TurnEnd::Complete { text }) => text,
            Ok(TurnEnd::IterationLimit { text }) => {
                warn!(
                    "Agent step stopped at iteration limit step={step} max_iterations={}",
                    self.config.max_iterations
                );
                text
            }
            Ok(TurnEnd::Suspended {
                suspension,
                structured,
                auto_submit,
            }) => {
                let mode = TurnMode::Agent { step, steps };
                return match self
                    .suspend(suspension, structured, auto_submit, mode, &progress)
                    .await
                {
                    Ok(result) => StepOutcome::Stop(result),
                    Err(e) => StepOutcome::Stop(self.abort(&e, &progress, started).await),
                };
            }
            Err(EngineError::Cancelled(reason)) => {
                info!("Agent loop cancelled step={step} reason={reason}");
                self.rearm_cancel();
                self.state.clear_transient();
                let text = self.last_assistant_text();
                return StepOutcome::Stop(
                    self.complete(&text, TerminationReason::Cancelled, &progress, started)
                        .await,
                );
            }
            Err(e) => return StepOutcome::Stop(self.abort(&e, &progress, started).await),
        };

        self.events
            .emit(AgentEvent::StepComplete {
                step,
                steps,
                usage: progress.usage.clone(),
            })
            .await;

        if let Some(marker) = self.sentinels.detect(&text).map(str::to_string) {
            info!("Sentinel matched step={step} marker={marker}");
            self.events
                .emit(AgentEvent::SentinelMatched { step, marker })
                .await;
            self.state.clear_transient();
            return StepOutcome::Stop(
                self.complete(&text, TerminationReason::DoneBySentinel, &progress, started)
                    .await,
            );
        }
        if step >= steps {
            self.state.clear_transient();
            return StepOutcome::Stop(
                self.complete(&text, TerminationReason::DoneByStepLimit, &progress, started)
                    .await,
            );
        }
        StepOutcome::Next(progress)
    }

    /// Result for a plain `resume` of an agent step: the step is finished
    /// but the remaining steps are left to the caller.
    pub(super) async fn stop_after_step(
        &mut self,
        outcome: StepOutcome,
        step: usize,
        steps: usize,
        started: Instant,
    ) -> TurnResult {
        match outcome {
            StepOutcome::Stop(result) => result,
            StepOutcome::Next(progress) => {
                debug!("Agent step resumed without continuing the loop step={step} steps={steps}");
                self.state.clear_transient();
                let text = self.last_assistant_text();
                self.complete(&text, TerminationReason::Done, &progress, started)
                    .await
            }
        }
    }

    async fn abort(&mut self, e: &EngineError, progress: &TurnProgress, started: Instant) -> TurnResult {
        error!("Agent loop aborted session_id={} error={e}", self.session_id);
        self.state.clear_transient();
        let text = self.last_assistant_text();
        let mut result = self
            .complete(&text, TerminationReason::Aborted, progress, started)
            .await;
        result.error = Some(e.to_string());
        result
    }
}
