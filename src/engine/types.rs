use crate::dispatch::{Invocation, Suspension, SuspendedCall};
use crate::stores::ContinuationToken;
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};

/// Error from a single provider attempt.
#[derive(Debug)]
pub(super) enum StreamError {
    /// Worth another attempt: rate limits, server errors, timeouts
    Recoverable(String),
    /// Retrying will not help: bad requests, auth failures
    Fatal(String),
}

/// Which operation a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub(super) enum TurnMode {
    Interactive,
    Agent { step: usize, steps: usize },
}

impl TurnMode {
    pub(super) const fn is_agent(self) -> bool {
        matches!(self, Self::Agent { .. })
    }
}

/// Work done by one operation so far. Carried across suspensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct TurnProgress {
    pub usage: TokenUsage,
    pub provider_calls: usize,
    /// Provider calls in the current user turn or agent step
    pub iterations: usize,
    pub auto_submit_skipped: bool,
}

/// Invocations from one assistant response still to be dispatched.
#[derive(Debug, Clone)]
pub(super) struct PendingBatch {
    pub invocations: Vec<Invocation>,
    /// The response carried provider-native calls, so the provider must be
    /// called again once they are answered
    pub structured: bool,
    pub auto_submit: bool,
}

/// How a turn driver run ended.
pub(super) enum TurnEnd {
    /// The assistant answered without further tool calls
    Complete { text: String },
    /// `max_iterations` provider calls were spent
    IterationLimit { text: String },
    Suspended {
        suspension: Suspension,
        structured: bool,
        auto_submit: bool,
    },
}

/// Everything needed to continue a turn from another call, or from another
/// engine instance sharing the same store and session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct SuspendedTurn {
    pub call: SuspendedCall,
    pub queued: Vec<Invocation>,
    pub structured: bool,
    pub auto_submit: bool,
    pub mode: TurnMode,
    pub progress: TurnProgress,
    #[serde(default)]
    pub transient: Vec<String>,
}

impl SuspendedTurn {
    /// Ids of every call that still needs a result: the suspended call first,
    /// then the queued ones.
    pub(super) fn call_ids(&self) -> Vec<String> {
        std::iter::once(self.call.invocation.call_id.clone())
            .chain(self.queued.iter().map(|i| i.call_id.clone()))
            .collect()
    }
}

/// The one continuation this engine has handed out and not seen resolved.
#[derive(Debug, Clone)]
pub(super) struct Outstanding {
    pub token: ContinuationToken,
    pub call_ids: Vec<String>,
}
