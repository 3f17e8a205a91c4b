//! Rough token estimation for the auto-submit input-size gate.

use crate::context::{Role, Turn};

/// Estimates token counts at roughly four characters per token.
///
/// Good enough to decide whether a follow-up request is too large; use the
/// provider's reported usage for anything billed.
pub struct TokenEstimator;

impl TokenEstimator {
    const CHARS_PER_TOKEN: usize = 4;

    /// Role and formatting overhead per turn.
    const TURN_OVERHEAD: usize = 4;

    /// Id, name and formatting overhead per structured call.
    const TOOL_CALL_OVERHEAD: usize = 20;

    const TOOL_RESULT_OVERHEAD: usize = 10;

    #[must_use]
    pub const fn estimate_text(text: &str) -> usize {
        text.len().div_ceil(Self::CHARS_PER_TOKEN)
    }

    #[must_use]
    pub fn estimate_turn(turn: &Turn) -> usize {
        let calls: usize = turn
            .tool_calls
            .iter()
            .map(|c| {
                Self::estimate_text(&c.name)
                    + Self::estimate_text(&c.arguments.to_string())
                    + Self::TOOL_CALL_OVERHEAD
            })
            .sum();
        let result_overhead = if turn.role == Role::Tool {
            Self::TOOL_RESULT_OVERHEAD
        } else {
            0
        };
        Self::estimate_text(&turn.content) + calls + result_overhead + Self::TURN_OVERHEAD
    }

    #[must_use]
    pub fn estimate_history(turns: &[Turn]) -> usize {
        turns.iter().map(Self::estimate_turn).sum()
    }

    /// Estimate for a full request: system prompt plus history.
    #[must_use]
    pub fn estimate_request(system: &str, turns: &[Turn]) -> usize {
        Self::estimate_text(system) + Self::estimate_history(turns)
    }
}
