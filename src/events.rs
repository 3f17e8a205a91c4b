//! Engine events for front-ends and process watchers.
//!
//! Events are optional: an engine built without an event channel only
//! forwards them to [`crate::hooks::EngineHooks::on_event`].
//!
//! # Event Flow
//!
//! A typical user turn looks like:
//! 1. `TurnStart` - a provider request is about to be sent
//! 2. `TextDelta` / `Text` / `ToolCallStart` / `ToolCallEnd`
//! 3. `InteractionRequired` if a tool suspends, otherwise back to 1
//! 4. `Done`, or `Error` if the turn failed

use crate::hooks::EngineHooks;
use crate::interaction::InteractionKind;
use crate::stores::ContinuationToken;
use crate::types::{SessionId, TerminationReason, TokenUsage, ToolResult, ToolTier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A provider request is about to be sent
    TurnStart {
        session_id: SessionId,
        iteration: usize,
    },

    /// Raw streamed text; finish markers are retained
    TextDelta { message_id: String, delta: String },

    /// Complete assistant text for one provider response, markers retained
    Text { message_id: String, text: String },

    ToolCallStart {
        id: String,
        name: String,
        display_name: String,
        input: serde_json::Value,
        tier: ToolTier,
    },

    ToolCallEnd {
        id: String,
        name: String,
        display_name: String,
        result: ToolResult,
    },

    /// A tool suspended. `token` is absent when an in-process handler answers.
    InteractionRequired {
        tool_call_id: String,
        tool_name: String,
        kind: InteractionKind,
        spec: serde_json::Value,
        token: Option<ContinuationToken>,
    },

    Resumed {
        tool_call_id: String,
        tool_name: String,
    },

    /// A continuation was discarded without resuming its tool
    ContinuationCancelled {
        token: ContinuationToken,
        tool_call_id: String,
        reason: String,
    },

    SentinelMatched { step: usize, marker: String },

    /// An auto-submit follow-up was not sent because the request was too large
    AutoSubmitSkipped {
        estimated_tokens: usize,
        limit: usize,
    },

    /// One provider round-trip finished
    TurnComplete { iteration: usize, usage: TokenUsage },

    StepComplete {
        step: usize,
        steps: usize,
        usage: TokenUsage,
    },

    Done {
        session_id: SessionId,
        termination_reason: TerminationReason,
        total_usage: TokenUsage,
        provider_calls: usize,
        duration: Duration,
    },

    Error { message: String, recoverable: bool },
}

impl AgentEvent {
    #[must_use]
    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    #[must_use]
    pub fn text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            message_id: message_id.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn tool_call_start(
        id: impl Into<String>,
        name: impl Into<String>,
        display_name: impl Into<String>,
        input: serde_json::Value,
        tier: ToolTier,
    ) -> Self {
        Self::ToolCallStart {
            id: id.into(),
            name: name.into(),
            display_name: display_name.into(),
            input,
            tier,
        }
    }

    #[must_use]
    pub fn tool_call_end(
        id: impl Into<String>,
        name: impl Into<String>,
        display_name: impl Into<String>,
        result: ToolResult,
    ) -> Self {
        Self::ToolCallEnd {
            id: id.into(),
            name: name.into(),
            display_name: display_name.into(),
            result,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
        }
    }
}

/// Per-engine event sequence, shared by everything that emits on its channel.
///
/// `Ordering::Relaxed` is sufficient because the mpsc channel provides the
/// happens-before ordering between sender and receiver.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Event plus delivery metadata, flattened into one JSON object.
///
/// `event_id` lets clients de-duplicate after a reconnect and `sequence`
/// restores order after persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    pub event_id: uuid::Uuid,
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    #[must_use]
    pub fn wrap(event: AgentEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}

/// Where the engine sends events: hooks first, then the optional channel.
pub(crate) struct EventSink<H> {
    tx: Option<mpsc::Sender<AgentEventEnvelope>>,
    seq: SequenceCounter,
    hooks: Arc<H>,
}

impl<H: EngineHooks> EventSink<H> {
    pub(crate) const fn new(
        tx: Option<mpsc::Sender<AgentEventEnvelope>>,
        seq: SequenceCounter,
        hooks: Arc<H>,
    ) -> Self {
        Self { tx, seq, hooks }
    }

    pub(crate) fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Deliver an event without letting a slow consumer stall the engine.
    ///
    /// Tries a non-blocking send first. A full channel gets up to 30 seconds;
    /// a closed channel or a timeout is logged and the event dropped.
    pub(crate) async fn emit(&self, event: AgentEvent) {
        self.hooks.on_event(&event).await;

        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(AgentEventEnvelope::wrap(event, &self.seq)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                log::debug!("Event channel full, waiting for consumer...");
                match tokio::time::timeout(Duration::from_secs(30), tx.send(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        log::warn!("Event channel closed while sending - consumer disconnected");
                    }
                    Err(_) => {
                        log::error!("Timeout waiting to send event - consumer may be deadlocked");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Event channel closed - consumer disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn sink_delivers_in_order_and_survives_closed_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(
            Some(tx),
            SequenceCounter::new(),
            Arc::new(crate::hooks::DefaultHooks),
        );
        sink.emit(AgentEvent::text("m", "one")).await;
        sink.emit(AgentEvent::text("m", "two")).await;

        let first = rx.recv().await.expect("first");
        let second = rx.recv().await.expect("second");
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);

        drop(rx);
        sink.emit(AgentEvent::error("ignored", false)).await;
    }

    #[test]
    fn sequence_counter_clones_share_state() {
        let seq = SequenceCounter::new();
        let clone = seq.clone();

        assert_eq!(seq.next(), 0);
        assert_eq!(clone.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[tokio::test]
    async fn sequence_counter_unique_across_concurrent_tasks() {
        let seq = SequenceCounter::new();
        let mut handles = Vec::new();
        for _ in 0..200 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move { seq.next() }));
        }

        let mut values = HashSet::new();
        for handle in handles {
            assert!(values.insert(handle.await.unwrap()));
        }
        assert_eq!(values.len(), 200);
    }

    #[test]
    fn wrap_assigns_ids_and_sequences() {
        let seq = SequenceCounter::new();
        let envelopes: Vec<_> = (0..10)
            .map(|_| AgentEventEnvelope::wrap(AgentEvent::text("m", "hi"), &seq))
            .collect();

        let ids: HashSet<uuid::Uuid> = envelopes.iter().map(|e| e.event_id).collect();
        assert_eq!(ids.len(), 10);
        for (i, env) in envelopes.iter().enumerate() {
            assert_eq!(env.sequence, i as u64);
        }
    }

    #[test]
    fn envelope_serializes_flat_json() {
        let seq = SequenceCounter::new();
        let envelope = AgentEventEnvelope::wrap(
            AgentEvent::InteractionRequired {
                tool_call_id: "c2".into(),
                tool_name: "delete".into(),
                kind: InteractionKind::Bool,
                spec: serde_json::json!({"description": "Delete tmp.txt?"}),
                token: Some(ContinuationToken::from_string("tok")),
            },
            &seq,
        );
        let json = serde_json::to_value(&envelope).expect("serialize");

        assert_eq!(json["type"], "interaction_required");
        assert_eq!(json["kind"], "bool");
        assert_eq!(json["token"], "tok");
        assert_eq!(json["sequence"], 0);
        assert!(json.get("event").is_none());

        let ts = json["timestamp"].as_str().expect("timestamp");
        time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339)
            .expect("timestamp should be valid RFC 3339");
    }

    #[test]
    fn envelope_roundtrip_serde() {
        let seq = SequenceCounter::new();
        let original = AgentEventEnvelope::wrap(
            AgentEvent::SentinelMatched {
                step: 2,
                marker: "[[done]]".into(),
            },
            &seq,
        );

        let json = serde_json::to_string(&original).expect("serialize");
        let restored: AgentEventEnvelope = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.event_id, original.event_id);
        assert!(matches!(
            restored.event,
            AgentEvent::SentinelMatched { step: 2, ref marker } if marker == "[[done]]"
        ));
    }
}
