//! Engine lifecycle hooks.
//!
//! - [`EngineHooks::pre_tool_use`] - veto a tool call before it starts
//! - [`EngineHooks::post_tool_use`] - observe every tool result
//! - [`EngineHooks::on_event`] - see every event, with or without a channel
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - allow everything, observe nothing
//! - [`LoggingHooks`] - debug logging for tool calls and events

use crate::events::AgentEvent;
use crate::types::{ToolResult, ToolTier};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    Allow,
    /// Refuse the call; the reason is returned to the model as a tool error
    Block(String),
}

#[async_trait]
pub trait EngineHooks: Send + Sync {
    /// Called before a tool starts. Not called again when it resumes.
    async fn pre_tool_use(&self, _tool_name: &str, _input: &Value, _tier: ToolTier) -> ToolDecision {
        ToolDecision::Allow
    }

    /// Called once per tool result, including error results.
    async fn post_tool_use(&self, _tool_name: &str, _result: &ToolResult) {}

    async fn on_event(&self, _event: &AgentEvent) {}
}

pub struct DefaultHooks;

#[async_trait]
impl EngineHooks for DefaultHooks {}

pub struct LoggingHooks;

#[async_trait]
impl EngineHooks for LoggingHooks {
    async fn pre_tool_use(&self, tool_name: &str, input: &Value, tier: ToolTier) -> ToolDecision {
        log::debug!("Pre-tool use tool={tool_name} tier={tier:?} input={input}");
        ToolDecision::Allow
    }

    async fn post_tool_use(&self, tool_name: &str, result: &ToolResult) {
        log::debug!(
            "Post-tool use tool={tool_name} success={} duration_ms={:?}",
            result.success,
            result.duration_ms
        );
    }

    async fn on_event(&self, event: &AgentEvent) {
        log::debug!("Engine event {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DenyMutations;

    #[async_trait]
    impl EngineHooks for DenyMutations {
        async fn pre_tool_use(&self, tool_name: &str, _input: &Value, tier: ToolTier) -> ToolDecision {
            match tier {
                ToolTier::Observe => ToolDecision::Allow,
                ToolTier::Mutate => ToolDecision::Block(format!("{tool_name} is not allowed")),
            }
        }
    }

    #[tokio::test]
    async fn test_default_hooks_allow() {
        let decision = DefaultHooks
            .pre_tool_use("delete", &json!({}), ToolTier::Mutate)
            .await;
        assert_eq!(decision, ToolDecision::Allow);
    }

    #[tokio::test]
    async fn test_custom_hooks_can_block() {
        let hooks = DenyMutations;
        assert_eq!(
            hooks.pre_tool_use("list", &json!({}), ToolTier::Observe).await,
            ToolDecision::Allow
        );
        assert_eq!(
            hooks.pre_tool_use("delete", &json!({}), ToolTier::Mutate).await,
            ToolDecision::Block("delete is not allowed".into())
        );
    }
}
