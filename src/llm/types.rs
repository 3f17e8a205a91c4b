use crate::context::{ToolCall, Turn};
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};

/// Normalized request handed to a provider adapter.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System prompt plus any transient context for this call
    pub system: String,
    pub messages: Vec<Turn>,
    pub tools: Option<Vec<ToolSpec>>,
    pub max_tokens: u32,
    pub model: String,
}

/// Tool description advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

impl ChatResponse {
    /// All text blocks joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Structured tool calls in emission order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall::new(
                    id.clone(),
                    name.clone(),
                    if input.is_null() {
                        serde_json::json!({})
                    } else {
                        input.clone()
                    },
                )),
                ContentBlock::Text { .. } => None,
            })
            .collect()
    }

    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

/// Classified result of one provider call.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Success(ChatResponse),
    /// Transient: retried with backoff
    RateLimited,
    /// Transient: retried with backoff
    ServerError(String),
    /// Fatal: malformed request
    InvalidRequest(String),
    /// Fatal: bad credentials
    Unauthorized(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: Vec<ContentBlock>) -> ChatResponse {
        ChatResponse {
            id: "r".into(),
            content,
            model: "m".into(),
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    #[test]
    fn test_text_joins_blocks() {
        let r = response(vec![
            ContentBlock::Text {
                text: "one".into(),
            },
            ContentBlock::ToolUse {
                id: "c1".into(),
                name: "list".into(),
                input: json!({}),
            },
            ContentBlock::Text {
                text: "two".into(),
            },
        ]);
        assert_eq!(r.text(), "one\ntwo");
        assert!(r.has_tool_use());
    }

    #[test]
    fn test_tool_calls_keep_order_and_normalize_null_input() {
        let r = response(vec![
            ContentBlock::ToolUse {
                id: "c1".into(),
                name: "list".into(),
                input: serde_json::Value::Null,
            },
            ContentBlock::ToolUse {
                id: "c2".into(),
                name: "delete".into(),
                input: json!({"path": "tmp.txt"}),
            },
        ]);
        let calls = r.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments, json!({}));
        assert_eq!(calls[1].id, "c2");
        assert_eq!(calls[1].arguments["path"], "tmp.txt");
    }
}
