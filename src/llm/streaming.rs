//! Streaming deltas and the buffer that reassembles them.
//!
//! The engine applies every [`StreamDelta`] to a [`StreamAccumulator`] and
//! only parses tool calls once the stream has finished, so a partial JSON
//! fragment is never dispatched.

use crate::llm::{ChatResponse, ContentBlock, StopReason, Usage};
use futures::Stream;
use std::pin::Pin;

#[derive(Debug, Clone)]
pub enum StreamDelta {
    TextDelta {
        delta: String,
        block_index: usize,
    },

    /// Start of a tool use block; id and name are known, input follows.
    ToolUseStart {
        id: String,
        name: String,
        block_index: usize,
    },

    /// Partial JSON for the tool input of `id`.
    ToolInputDelta {
        id: String,
        delta: String,
        block_index: usize,
    },

    Usage(Usage),

    Done {
        stop_reason: Option<StopReason>,
    },

    Error {
        message: String,
        /// Rate limits and server errors are recoverable
        recoverable: bool,
    },
}

pub type StreamBox<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send + 'a>>;

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Collects deltas into the blocks of a final [`ChatResponse`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    blocks: Vec<(usize, PartialBlock)>,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::TextDelta { delta, block_index } => {
                if let Some((_, PartialBlock::Text(text))) =
                    self.blocks.iter_mut().find(|(i, _)| i == block_index)
                {
                    text.push_str(delta);
                } else {
                    self.blocks
                        .push((*block_index, PartialBlock::Text(delta.clone())));
                }
            }
            StreamDelta::ToolUseStart {
                id,
                name,
                block_index,
            } => {
                self.blocks.push((
                    *block_index,
                    PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input_json: String::new(),
                    },
                ));
            }
            StreamDelta::ToolInputDelta { id, delta, .. } => {
                let target = self.blocks.iter_mut().find_map(|(_, b)| match b {
                    PartialBlock::ToolUse {
                        id: block_id,
                        input_json,
                        ..
                    } if block_id == id => Some(input_json),
                    _ => None,
                });
                match target {
                    Some(input_json) => input_json.push_str(delta),
                    None => log::warn!("Input delta for unknown tool use '{id}' dropped"),
                }
            }
            StreamDelta::Usage(u) => self.usage = Some(*u),
            StreamDelta::Done { stop_reason } => self.stop_reason = *stop_reason,
            StreamDelta::Error { .. } => {}
        }
    }

    #[must_use]
    pub const fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub const fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Finish the stream into content blocks ordered by block index.
    ///
    /// Empty tool input becomes `{}`. Input that is not valid JSON is kept as
    /// a JSON string so the dispatcher can report it to the model instead of
    /// running the tool with guessed arguments.
    #[must_use]
    pub fn into_content_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = self.blocks;
        blocks.sort_by_key(|(idx, _)| *idx);

        blocks
            .into_iter()
            .filter_map(|(_, block)| match block {
                PartialBlock::Text(text) if text.is_empty() => None,
                PartialBlock::Text(text) => Some(ContentBlock::Text { text }),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&input_json)
                            .unwrap_or(serde_json::Value::String(input_json))
                    };
                    Some(ContentBlock::ToolUse { id, name, input })
                }
            })
            .collect()
    }

    /// Finish the stream into a complete response.
    #[must_use]
    pub fn into_response(self, id: String, model: String) -> ChatResponse {
        let usage = self.usage.unwrap_or_default();
        let stop_reason = self.stop_reason;
        ChatResponse {
            id,
            content: self.into_content_blocks(),
            model,
            stop_reason,
            usage,
        }
    }
}

/// Replay a complete response as the deltas a streaming backend would emit.
#[must_use]
pub fn response_to_deltas(response: ChatResponse) -> Vec<StreamDelta> {
    let mut deltas = Vec::with_capacity(response.content.len() + 2);
    for (block_index, block) in response.content.into_iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                deltas.push(StreamDelta::TextDelta {
                    delta: text,
                    block_index,
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                deltas.push(StreamDelta::ToolUseStart {
                    id: id.clone(),
                    name,
                    block_index,
                });
                deltas.push(StreamDelta::ToolInputDelta {
                    id,
                    delta: input.to_string(),
                    block_index,
                });
            }
        }
    }
    deltas.push(StreamDelta::Usage(response.usage));
    deltas.push(StreamDelta::Done {
        stop_reason: response.stop_reason,
    });
    deltas
}
