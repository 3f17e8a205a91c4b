//! Conversation state owned by one engine.
//!
//! Turns are append-only. Transient context (step status, write policy
//! notes) rides along with the next provider request and is never stored as
//! a turn.

mod estimator;

pub use estimator::TokenEstimator;

use crate::types::ToolResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// A tool result. Results of structured calls answer a [`ToolCall`] in
    /// the preceding assistant turn; results of text-embedded action blocks
    /// have [`Turn::pseudo`] set and answer no structured call.
    Tool,
}

/// One model-issued invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments. Argument text that failed to parse is kept as a
    /// JSON string so it can be reported back to the model.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from the raw argument text a provider returned.
    #[must_use]
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, arguments_json: &str) -> Self {
        let arguments = if arguments_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments_json)
                .unwrap_or_else(|_| serde_json::Value::String(arguments_json.to_string()))
        };
        Self::new(id, name, arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Set on tool turns: the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant turns that issued structured calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub is_error: bool,
    /// Result of a text-embedded action block. Its `tool_call_id` is
    /// synthetic, so adapters that pair results with provider calls should
    /// send it as plain text instead.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pseudo: bool,
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
            pseudo: false,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
            is_error: false,
            pseudo: false,
        }
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.output.clone(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
            is_error: !result.success,
            pseudo: false,
        }
    }

    /// Result of a text-embedded action block.
    #[must_use]
    pub fn pseudo_result(tool_call_id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            pseudo: true,
            ..Self::tool_result(tool_call_id, result)
        }
    }
}

/// Ordered turns plus transient per-request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    #[serde(skip)]
    transient: Vec<String>,
}

impl ConversationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            transient: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    #[must_use]
    pub fn assistant_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::Assistant).count()
    }

    /// Structured calls in the latest assistant turn that have no result yet.
    ///
    /// The provider must not be called while this is non-empty.
    #[must_use]
    pub fn unanswered_calls(&self) -> Vec<&ToolCall> {
        let Some(pos) = self.latest_assistant_pos() else {
            return Vec::new();
        };
        let answered = self.answered_ids();
        self.turns[pos]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .collect()
    }

    /// Ids answered by tool turns after the latest assistant turn.
    ///
    /// Providers may reuse call ids across responses, so results recorded
    /// before that turn never count.
    #[must_use]
    pub fn answered_ids(&self) -> HashSet<&str> {
        let from = self.latest_assistant_pos().map_or(0, |pos| pos + 1);
        self.turns[from..]
            .iter()
            .filter_map(|t| t.tool_call_id.as_deref())
            .collect()
    }

    /// Append the result for `tool_call_id`, marking it as a pseudo result
    /// when the latest assistant turn has no structured call with that id.
    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, result: &ToolResult) {
        let tool_call_id = tool_call_id.into();
        let structured = self
            .last_assistant()
            .is_some_and(|t| t.tool_calls.iter().any(|c| c.id == tool_call_id));
        self.turns.push(if structured {
            Turn::tool_result(tool_call_id, result)
        } else {
            Turn::pseudo_result(tool_call_id, result)
        });
    }

    fn latest_assistant_pos(&self) -> Option<usize> {
        self.turns.iter().rposition(|t| t.role == Role::Assistant)
    }

    pub fn set_transient(&mut self, notes: Vec<String>) {
        self.transient = notes;
    }

    pub fn clear_transient(&mut self) {
        self.transient.clear();
    }

    #[must_use]
    pub fn transient(&self) -> &[String] {
        &self.transient
    }

    /// System prompt with the transient notes appended, as sent to the provider.
    #[must_use]
    pub fn system_with_transient(&self, system_prompt: &str) -> String {
        if self.transient.is_empty() {
            return system_prompt.to_string();
        }
        let mut system = system_prompt.to_string();
        for note in &self.transient {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(note);
        }
        system
    }

    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        TokenEstimator::estimate_history(&self.turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_keeps_unparseable_arguments() {
        let ok = ToolCall::from_raw("c1", "list", r#"{"dir": "."}"#);
        assert_eq!(ok.arguments, json!({"dir": "."}));

        let empty = ToolCall::from_raw("c2", "list", "  ");
        assert_eq!(empty.arguments, json!({}));

        let bad = ToolCall::from_raw("c3", "list", "{dir: .");
        assert_eq!(bad.arguments, json!("{dir: ."));
    }

    #[test]
    fn test_unanswered_calls_tracks_latest_assistant_turn() {
        let mut state = ConversationState::new();
        state.push(Turn::user("list files then delete tmp.txt"));
        state.push(Turn::assistant(
            "",
            vec![
                ToolCall::new("c1", "list", json!({})),
                ToolCall::new("c2", "delete", json!({"path": "tmp.txt"})),
            ],
        ));
        assert_eq!(state.unanswered_calls().len(), 2);

        state.push(Turn::tool_result("c1", &ToolResult::success("a.txt")));
        let pending: Vec<_> = state.unanswered_calls().iter().map(|c| c.id.clone()).collect();
        assert_eq!(pending, vec!["c2".to_string()]);

        state.push(Turn::tool_result("c2", &ToolResult::error("cancelled")));
        assert!(state.unanswered_calls().is_empty());
        assert!(state.turns()[3].is_error);
    }

    #[test]
    fn test_reused_call_id_is_not_answered_by_older_result() {
        let mut state = ConversationState::new();
        state.push(Turn::user("list"));
        state.push(Turn::assistant("", vec![ToolCall::new("call_0", "list", json!({}))]));
        state.push_tool_result("call_0", &ToolResult::success("a.txt"));
        state.push(Turn::assistant("a.txt", vec![]));
        state.push(Turn::user("delete a.txt"));
        state.push(Turn::assistant(
            "",
            vec![ToolCall::new("call_0", "delete", json!({"path": "a.txt"}))],
        ));

        assert!(state.answered_ids().is_empty());
        assert_eq!(state.unanswered_calls().len(), 1);
    }

    #[test]
    fn test_push_tool_result_marks_pseudo_results() {
        let mut state = ConversationState::new();
        state.push(Turn::user("go"));
        state.push(Turn::assistant("", vec![ToolCall::new("c1", "list", json!({}))]));
        state.push_tool_result("c1", &ToolResult::success("a.txt"));
        state.push_tool_result("pseudo_1", &ToolResult::success("noted"));

        assert!(!state.turns()[2].pseudo);
        assert!(state.turns()[3].pseudo);
        let json = serde_json::to_value(&state.turns()[2]).unwrap();
        assert!(json.get("pseudo").is_none());
    }

    #[test]
    fn test_transient_context_is_not_persisted() {
        let mut state = ConversationState::new();
        state.push(Turn::user("hi"));
        state.set_transient(vec!["Step 1 of 3".into()]);
        assert_eq!(state.system_with_transient("Be brief."), "Be brief.\n\nStep 1 of 3");
        assert_eq!(state.system_with_transient(""), "Step 1 of 3");

        let json = serde_json::to_string(&state).unwrap();
        let restored: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.transient().is_empty());

        state.clear_transient();
        assert_eq!(state.system_with_transient("Be brief."), "Be brief.");
    }
}
