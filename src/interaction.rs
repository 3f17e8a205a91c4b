//! Interactions a tool can raise mid-call, and in-process handlers for them.
//!
//! - [`InteractionRequest`] - what a suspended tool asks for, plus its private state
//! - [`InteractionResponse`] - the caller's answer, threaded back into `resume`
//! - [`ConfirmationRequest`] / [`QuestionRequest`] / [`FileRequest`] - typed specs
//! - [`InteractionHandler`] - answers requests in-process for blocking front-ends
//! - [`ChannelInteractionHandler`] - bridges requests to a UI task over channels
//!
//! # Non-blocking flow
//!
//! 1. A tool returns `ToolOutcome::Suspended(request)`
//! 2. The engine stores the private state and hands the caller a token
//! 3. The caller shows `kind` and `spec` to the user
//! 4. The caller resumes with the token and an [`InteractionResponse`]
//!
//! # Blocking flow
//!
//! With an [`InteractionHandler`] installed the engine asks the handler and
//! resumes the tool immediately. No token is minted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Text,
    Bool,
    Choice,
    Files,
}

/// Raised by a tool that cannot complete without caller input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub kind: InteractionKind,
    /// Shown to the caller
    pub spec: Value,
    /// Handed back to the tool's `resume`; never shown to the caller
    pub private_state: Value,
}

impl InteractionRequest {
    #[must_use]
    pub fn new(kind: InteractionKind, spec: Value, private_state: Value) -> Self {
        Self {
            kind,
            spec,
            private_state,
        }
    }

    #[must_use]
    pub fn confirm(request: &ConfirmationRequest, private_state: Value) -> Self {
        Self::new(InteractionKind::Bool, to_spec(request), private_state)
    }

    /// Free-form question, or a choice when the request carries options.
    #[must_use]
    pub fn question(request: &QuestionRequest, private_state: Value) -> Self {
        let kind = if request.options.is_empty() {
            InteractionKind::Text
        } else {
            InteractionKind::Choice
        };
        Self::new(kind, to_spec(request), private_state)
    }

    #[must_use]
    pub fn files(request: &FileRequest, private_state: Value) -> Self {
        Self::new(InteractionKind::Files, to_spec(request), private_state)
    }
}

fn to_spec<T: Serialize>(spec: &T) -> Value {
    serde_json::to_value(spec).unwrap_or(Value::Null)
}

/// Yes/no confirmation of a pending action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub description: String,
    /// Pretty-printed arguments of the pending call
    pub input_preview: String,
}

impl ConfirmationRequest {
    #[must_use]
    pub fn new(
        tool_name: impl Into<String>,
        description: impl Into<String>,
        input: &Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            description: description.into(),
            input_preview: serde_json::to_string_pretty(input).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    pub header: Option<String>,
    /// Empty means free-form text input.
    pub options: Vec<QuestionOption>,
    pub multi_select: bool,
}

impl QuestionRequest {
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            header: None,
            options: Vec::new(),
            multi_select: false,
        }
    }

    #[must_use]
    pub fn with_options(question: impl Into<String>, options: Vec<QuestionOption>) -> Self {
        Self {
            options,
            ..Self::new(question)
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    #[must_use]
    pub const fn with_multi_select(mut self) -> Self {
        self.multi_select = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub description: Option<String>,
}

impl QuestionOption {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
        }
    }
}

/// Request for one or more file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub prompt: String,
    pub multiple: bool,
    /// Accepted extensions, e.g. `["rs", "toml"]`; empty accepts anything
    #[serde(default)]
    pub accept: Vec<String>,
}

/// The caller's answer to an [`InteractionRequest`].
///
/// Stored as plain JSON so every front-end can produce it. Accessors accept
/// the shapes the constructors produce plus a few obvious shorthands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionResponse(pub Value);

impl InteractionResponse {
    #[must_use]
    pub fn confirm(approved: bool) -> Self {
        Self(json!({ "confirm": approved }))
    }

    #[must_use]
    pub fn text(answer: impl Into<String>) -> Self {
        Self(json!({ "text": answer.into() }))
    }

    #[must_use]
    pub fn choices(labels: Vec<String>) -> Self {
        Self(json!({ "choices": labels }))
    }

    #[must_use]
    pub fn files(paths: Vec<String>) -> Self {
        Self(json!({ "files": paths }))
    }

    /// The user dismissed the interaction without answering.
    #[must_use]
    pub fn dismissed() -> Self {
        Self(json!({ "dismissed": true }))
    }

    #[must_use]
    pub fn is_dismissed(&self) -> bool {
        self.0.get("dismissed").and_then(Value::as_bool) == Some(true)
    }

    /// `true`, `{"confirm": true}`, or `"yes"`/`"y"`/`"no"`/`"n"`.
    #[must_use]
    pub fn confirmed(&self) -> Option<bool> {
        match &self.0 {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "y" | "yes" | "true" => Some(true),
                "n" | "no" | "false" => Some(false),
                _ => None,
            },
            Value::Object(map) => map.get("confirm").and_then(Value::as_bool),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.0 {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }

    #[must_use]
    pub fn selected(&self) -> Vec<String> {
        self.string_list("choices")
    }

    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.string_list("files")
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Answers interactions in-process for blocking front-ends.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Collect the caller's answer.
    ///
    /// # Errors
    /// An error is reported to the model as a failure of the tool call.
    async fn handle(&self, kind: InteractionKind, spec: &Value) -> Result<InteractionResponse>;
}

/// A request forwarded by [`ChannelInteractionHandler`].
#[derive(Debug)]
pub struct InteractionPrompt {
    pub kind: InteractionKind,
    pub spec: Value,
    pub reply: oneshot::Sender<InteractionResponse>,
}

/// Forwards interactions to a UI task and waits for its reply.
///
/// Used when the engine runs on a worker and the UI owns an event loop.
pub struct ChannelInteractionHandler {
    tx: mpsc::Sender<InteractionPrompt>,
}

impl ChannelInteractionHandler {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<InteractionPrompt>) -> Self {
        Self { tx }
    }

    /// Returns `(handler, prompt_receiver)`; the UI side answers each prompt
    /// through its `reply` sender.
    #[must_use]
    pub fn with_channel(buffer_size: usize) -> (Self, mpsc::Receiver<InteractionPrompt>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl InteractionHandler for ChannelInteractionHandler {
    async fn handle(&self, kind: InteractionKind, spec: &Value) -> Result<InteractionResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(InteractionPrompt {
                kind,
                spec: spec.clone(),
                reply,
            })
            .await
            .ok()
            .context("interaction channel closed")?;
        response.await.context("interaction dropped without a reply")
    }
}
