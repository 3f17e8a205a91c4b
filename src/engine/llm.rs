use super::helpers::calculate_backoff_delay;
use super::types::StreamError;
use crate::error::EngineError;
use crate::events::{AgentEvent, EventSink};
use crate::hooks::EngineHooks;
use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, LlmProvider, StreamAccumulator, StreamDelta};
use crate::types::EngineConfig;
use futures::StreamExt;
use log::{error, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Call the provider, retrying transient failures with backoff.
///
/// Cancellation is checked while the call is in flight and while waiting
/// between attempts.
pub(super) async fn call_llm_with_retry<P, H>(
    provider: &P,
    request: &ChatRequest,
    config: &EngineConfig,
    events: &EventSink<H>,
    cancel: &CancellationToken,
    message_id: &str,
) -> Result<ChatResponse, EngineError>
where
    P: LlmProvider,
    H: EngineHooks,
{
    let max_retries = config.retry.max_retries;
    let mut attempt = 0u32;

    loop {
        let result = tokio::select! {
            () = cancel.cancelled() => {
                return Err(EngineError::Cancelled("provider call cancelled".into()));
            }
            result = attempt_once(provider, request, config, events, message_id) => result,
        };

        match result {
            Ok(response) => return Ok(response),
            Err(StreamError::Recoverable(msg)) => {
                attempt += 1;
                if attempt > max_retries {
                    error!("Provider error after {max_retries} retries: {msg}");
                    let error_msg = format!("Provider error after {max_retries} retries: {msg}");
                    events.emit(AgentEvent::error(&error_msg, true)).await;
                    return Err(EngineError::transient(error_msg));
                }
                let delay = calculate_backoff_delay(attempt, &config.retry);
                warn!(
                    "Provider error, retrying (attempt={attempt}, delay_ms={}, error={msg})",
                    delay.as_millis()
                );

                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(EngineError::Cancelled("provider call cancelled".into()));
                    }
                    () = sleep(delay) => {}
                }
            }
            Err(StreamError::Fatal(msg)) => {
                error!("Provider error (non-recoverable): {msg}");
                events.emit(AgentEvent::error(&msg, false)).await;
                return Err(EngineError::fatal(msg));
            }
        }
    }
}

/// One attempt, bounded by the configured timeout. A timeout is recoverable.
async fn attempt_once<P, H>(
    provider: &P,
    request: &ChatRequest,
    config: &EngineConfig,
    events: &EventSink<H>,
    message_id: &str,
) -> Result<ChatResponse, StreamError>
where
    P: LlmProvider,
    H: EngineHooks,
{
    let call = async {
        if config.streaming {
            process_stream(provider, request, events, message_id).await
        } else {
            chat_once(provider, request).await
        }
    };

    match config.provider_timeout() {
        Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(StreamError::Recoverable(format!(
                "provider call timed out after {}ms",
                limit.as_millis()
            )))
        }),
        None => call.await,
    }
}

async fn chat_once<P: LlmProvider>(
    provider: &P,
    request: &ChatRequest,
) -> Result<ChatResponse, StreamError> {
    match provider.chat(request.clone()).await {
        Ok(ChatOutcome::Success(response)) => Ok(response),
        Ok(ChatOutcome::RateLimited) => Err(StreamError::Recoverable("rate limited".into())),
        Ok(ChatOutcome::ServerError(msg)) => Err(StreamError::Recoverable(format!(
            "server error: {msg}"
        ))),
        Ok(ChatOutcome::InvalidRequest(msg)) => {
            Err(StreamError::Fatal(format!("Invalid request: {msg}")))
        }
        Ok(ChatOutcome::Unauthorized(msg)) => Err(StreamError::Fatal(format!("Unauthorized: {msg}"))),
        Err(e) => Err(StreamError::Fatal(format!("LLM error: {e:#}"))),
    }
}

/// Consume one streamed response, forwarding text deltas as they arrive.
///
/// Tool calls are only read from the accumulated response, never from
/// partial input fragments.
async fn process_stream<P, H>(
    provider: &P,
    request: &ChatRequest,
    events: &EventSink<H>,
    message_id: &str,
) -> Result<ChatResponse, StreamError>
where
    P: LlmProvider,
    H: EngineHooks,
{
    let mut stream = provider.chat_stream(request.clone());
    let mut accumulator = StreamAccumulator::new();
    let mut delta_count: u64 = 0;

    log::debug!("Starting to consume LLM stream");

    while let Some(result) = stream.next().await {
        match result {
            Ok(delta) => {
                delta_count += 1;
                accumulator.apply(&delta);
                match &delta {
                    StreamDelta::TextDelta { delta, .. } => {
                        events
                            .emit(AgentEvent::text_delta(message_id, delta.clone()))
                            .await;
                    }
                    StreamDelta::Error {
                        message,
                        recoverable,
                    } => {
                        log::warn!(
                            "Stream error received delta_count={delta_count} message={message} recoverable={recoverable}"
                        );
                        return if *recoverable {
                            Err(StreamError::Recoverable(message.clone()))
                        } else {
                            Err(StreamError::Fatal(message.clone()))
                        };
                    }
                    StreamDelta::Done { .. }
                    | StreamDelta::Usage(_)
                    | StreamDelta::ToolUseStart { .. }
                    | StreamDelta::ToolInputDelta { .. } => {}
                }
            }
            Err(e) => {
                log::error!("Stream iteration error delta_count={delta_count} error={e:#}");
                return Err(StreamError::Recoverable(format!("Stream error: {e:#}")));
            }
        }
    }

    let response = accumulator.into_response(String::new(), provider.model().to_string());
    log::debug!(
        "LLM stream completed delta_count={delta_count} stop_reason={:?} content_block_count={} input_tokens={} output_tokens={}",
        response.stop_reason,
        response.content.len(),
        response.usage.input_tokens,
        response.usage.output_tokens
    );
    Ok(response)
}
