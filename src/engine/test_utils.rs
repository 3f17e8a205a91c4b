use crate::events::{AgentEvent, AgentEventEnvelope};
use crate::interaction::{ConfirmationRequest, InteractionRequest, InteractionResponse};
use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, ContentBlock, LlmProvider, StopReason, Usage};
use crate::tools::{DynamicToolName, Tool, ToolContext, ToolInput, ToolOutcome};
use crate::types::{ToolResult, ToolTier};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

// ===================
// Mock LLM Provider
// ===================

pub struct MockProvider {
    responses: RwLock<Vec<ChatOutcome>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: RwLock::new(responses),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    fn response(content: Vec<ContentBlock>, stop_reason: StopReason) -> ChatOutcome {
        ChatOutcome::Success(ChatResponse {
            id: "msg_1".to_string(),
            content,
            model: "mock-model".to_string(),
            stop_reason: Some(stop_reason),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }

    pub fn text_response(text: &str) -> ChatOutcome {
        Self::response(
            vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            StopReason::EndTurn,
        )
    }

    pub fn tool_use_response(tool_id: &str, tool_name: &str, input: Value) -> ChatOutcome {
        Self::tool_uses_response(vec![(tool_id, tool_name, input)])
    }

    pub fn tool_uses_response(tool_uses: Vec<(&str, &str, Value)>) -> ChatOutcome {
        let content = tool_uses
            .into_iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            })
            .collect();
        Self::response(content, StopReason::ToolUse)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.requests.lock().expect("lock poisoned").push(request);
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.read().expect("lock poisoned");
        if idx < responses.len() {
            Ok(responses[idx].clone())
        } else {
            // Default: end conversation
            Ok(Self::text_response("Done"))
        }
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

/// Never answers within any sane timeout.
pub struct StalledProvider;

#[async_trait]
impl LlmProvider for StalledProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(MockProvider::text_response("too late"))
    }

    fn model(&self) -> &'static str {
        "stalled-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

/// Collect whatever events are buffered right now.
pub fn drain_events(rx: &mut mpsc::Receiver<AgentEventEnvelope>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

// ===================
// Mock Tools
// ===================

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Completes immediately and records each call as `name:arguments`.
pub struct RecordingTool {
    pub name: &'static str,
    pub tier: ToolTier,
    pub auto_submit: bool,
    pub log: CallLog,
}

impl RecordingTool {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            tier: ToolTier::Observe,
            auto_submit: false,
            log: Arc::clone(log),
        }
    }

    pub const fn mutating(mut self) -> Self {
        self.tier = ToolTier::Mutate;
        self
    }

    pub const fn auto_submitting(mut self) -> Self {
        self.auto_submit = true;
        self
    }
}

impl Tool<()> for RecordingTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new(self.name)
    }

    fn display_name(&self) -> &'static str {
        "Recording"
    }

    fn description(&self) -> &'static str {
        "Records its calls"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn tier(&self) -> ToolTier {
        self.tier
    }

    async fn start(&self, ctx: &ToolContext<()>, input: ToolInput) -> Result<ToolOutcome> {
        self.log
            .lock()
            .expect("lock poisoned")
            .push(format!("{}:{}", self.name, input.arguments));
        let output = if ctx.is_dry_run() {
            format!("{} would run", self.name)
        } else {
            match &input.content {
                Some(content) => format!("{} ok: {content}", self.name),
                None => format!("{} ok", self.name),
            }
        };
        let result = ToolResult::success(output);
        Ok(ToolOutcome::completed(if self.auto_submit {
            result.with_auto_submit()
        } else {
            result
        }))
    }
}

/// Asks for confirmation before "deleting" the `path` argument.
///
/// The side effect (a log entry) only happens on a confirmed resume.
pub struct ConfirmDeleteTool {
    pub log: CallLog,
    pub auto_submit: bool,
}

impl ConfirmDeleteTool {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: Arc::clone(log),
            auto_submit: true,
        }
    }
}

impl Tool<()> for ConfirmDeleteTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("delete")
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["rm"]
    }

    fn display_name(&self) -> &'static str {
        "Delete"
    }

    fn description(&self) -> &'static str {
        "Delete a file after confirmation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Mutate
    }

    async fn start(&self, _ctx: &ToolContext<()>, input: ToolInput) -> Result<ToolOutcome> {
        let path = input.arg_str("path").unwrap_or_default().to_string();
        let request = ConfirmationRequest::new("delete", format!("Delete {path}?"), &input.arguments);
        Ok(ToolOutcome::suspend(InteractionRequest::confirm(
            &request,
            json!({ "path": path, "content": input.content }),
        )))
    }

    async fn resume(
        &self,
        _ctx: &ToolContext<()>,
        state: Value,
        response: InteractionResponse,
    ) -> Result<ToolOutcome> {
        let path = state["path"].as_str().unwrap_or_default();
        if response.confirmed() != Some(true) {
            return Ok(ToolOutcome::failed(format!("user declined deleting {path}")));
        }
        self.log
            .lock()
            .expect("lock poisoned")
            .push(format!("deleted:{path}"));
        let result = ToolResult::success(format!("deleted {path}"));
        Ok(ToolOutcome::completed(if self.auto_submit {
            result.with_auto_submit()
        } else {
            result
        }))
    }
}

/// Asks two questions in a row before completing.
pub struct TwoQuestionTool;

impl Tool<()> for TwoQuestionTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("survey")
    }

    fn display_name(&self) -> &'static str {
        "Survey"
    }

    fn description(&self) -> &'static str {
        "Asks two questions"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Observe
    }

    async fn start(&self, _ctx: &ToolContext<()>, _input: ToolInput) -> Result<ToolOutcome> {
        Ok(ToolOutcome::suspend(InteractionRequest::new(
            crate::interaction::InteractionKind::Text,
            json!({ "question": "Name?" }),
            json!({ "answers": [] }),
        )))
    }

    async fn resume(
        &self,
        _ctx: &ToolContext<()>,
        state: Value,
        response: InteractionResponse,
    ) -> Result<ToolOutcome> {
        let mut answers: Vec<String> = serde_json::from_value(state["answers"].clone())?;
        answers.push(response.as_text().unwrap_or_default().to_string());
        if answers.len() < 2 {
            return Ok(ToolOutcome::suspend(InteractionRequest::new(
                crate::interaction::InteractionKind::Text,
                json!({ "question": "Colour?" }),
                json!({ "answers": answers }),
            )));
        }
        Ok(ToolOutcome::completed(ToolResult::success(answers.join(", "))))
    }
}
