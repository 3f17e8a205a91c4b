//! Error taxonomy for the turn engine.
//!
//! Only fatal provider failures, configuration errors and cancellation end a
//! turn with an `Err`. Tool execution and protocol errors are normally folded
//! into the conversation as tool results. Their variants exist so dispatcher
//! internals and hooks can talk about them precisely.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The model backend failed. Transient failures (timeouts, rate limits,
    /// server errors) may be retried with a fresh turn.
    #[error("provider error: {message}")]
    Provider { message: String, transient: bool },

    /// A tool failed while executing.
    #[error("tool execution error: {0}")]
    ToolExecution(String),

    /// Malformed tool-call arguments or an unknown tool name.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Resume or cancel against an unknown, consumed, or expired token.
    #[error("interaction expired: {0}")]
    InteractionExpired(String),

    /// Invalid engine or registry setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the in-flight operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The continuation store backend failed.
    #[error("continuation store error: {0}")]
    Store(String),
}

impl EngineError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: true,
        }
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether a fresh attempt of the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                transient: true,
                ..
            }
        )
    }

    /// Whether the error ends the current turn or loop instead of being
    /// folded into the conversation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Configuration(_) | Self::Cancelled(_) | Self::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(EngineError::transient("timeout").is_transient());
        assert!(!EngineError::fatal("auth").is_transient());
        assert!(EngineError::fatal("auth").is_terminal());
        assert!(EngineError::Configuration("x".into()).is_terminal());
        assert!(!EngineError::Protocol("x".into()).is_terminal());
        assert!(!EngineError::ToolExecution("x".into()).is_terminal());
        assert!(!EngineError::InteractionExpired("x".into()).is_terminal());
    }

    #[test]
    fn test_display() {
        let err = EngineError::InteractionExpired("token abc".into());
        assert_eq!(err.to_string(), "interaction expired: token abc");
    }
}
