//! Provider-agnostic model interface.
//!
//! Concrete HTTP clients live outside this crate. They implement
//! [`LlmProvider`] and normalize their backend's request and response shapes
//! into [`ChatRequest`] / [`ChatResponse`].

pub mod streaming;
pub mod types;

pub use streaming::{StreamAccumulator, StreamBox, StreamDelta};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send the conversation and return the complete response.
    ///
    /// Return `Ok` with a non-success [`ChatOutcome`] for classified backend
    /// failures. An `Err` is treated as fatal for the current turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;

    /// Stream the response as deltas.
    ///
    /// The default adapts [`LlmProvider::chat`] into a single burst of deltas
    /// for providers without native streaming.
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        Box::pin(async_stream::stream! {
            match self.chat(request).await {
                Ok(ChatOutcome::Success(response)) => {
                    for delta in streaming::response_to_deltas(response) {
                        yield Ok(delta);
                    }
                }
                Ok(ChatOutcome::RateLimited) => {
                    yield Ok(StreamDelta::Error {
                        message: "rate limited".to_string(),
                        recoverable: true,
                    });
                }
                Ok(ChatOutcome::ServerError(message)) => {
                    yield Ok(StreamDelta::Error { message, recoverable: true });
                }
                Ok(ChatOutcome::InvalidRequest(message) | ChatOutcome::Unauthorized(message)) => {
                    yield Ok(StreamDelta::Error { message, recoverable: false });
                }
                Err(error) => yield Err(error),
            }
        })
    }

    fn model(&self) -> &str;

    fn provider(&self) -> &'static str;
}
