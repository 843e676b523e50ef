//! Event classification
//!
//! Inspects the `event:` label and, only when needed, the fields of the JSON
//! payload that the filter relies on. Payloads are decoded into narrow views
//! so unrelated fields are never interpreted.

use serde::Deserialize;

use crate::event::StructuredEvent;
use crate::{Error, Result};

/// `event:` label opening a content block
pub const CONTENT_BLOCK_START: &str = "content_block_start";
/// `event:` label carrying an incremental block update
pub const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
/// `event:` label closing a content block
pub const CONTENT_BLOCK_STOP: &str = "content_block_stop";

const THINKING_BLOCK: &str = "thinking";

/// Coarse category of an event as seen by the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// `content_block_start` whose block is a thinking block
    ThinkingOpen,
    /// `content_block_delta`
    BlockDelta,
    /// `content_block_stop`
    BlockStop,
    /// Anything else, including non-thinking block starts
    Other,
}

#[derive(Debug, Deserialize)]
struct BlockStartView {
    content_block: ContentBlockHeader,
}

#[derive(Debug, Deserialize)]
struct ContentBlockHeader {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct BlockIndexView {
    index: u64,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaView {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Delta {
    #[serde(rename = "thinking_delta")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Categorize an event for the filter state machine
pub fn classify(event: &StructuredEvent) -> EventClass {
    match event.kind.as_str() {
        CONTENT_BLOCK_START if is_thinking_open(event) => EventClass::ThinkingOpen,
        CONTENT_BLOCK_DELTA => EventClass::BlockDelta,
        CONTENT_BLOCK_STOP => EventClass::BlockStop,
        _ => EventClass::Other,
    }
}

/// True iff the event opens a thinking block.
///
/// A payload that fails to decode is never treated as a thinking block.
pub fn is_thinking_open(event: &StructuredEvent) -> bool {
    if event.kind != CONTENT_BLOCK_START {
        return false;
    }

    serde_json::from_str::<BlockStartView>(&event.payload)
        .map(|view| view.content_block.kind == THINKING_BLOCK)
        .unwrap_or(false)
}

/// True iff the event is an incremental block update
pub fn is_block_delta(event: &StructuredEvent) -> bool {
    event.kind == CONTENT_BLOCK_DELTA
}

/// True iff the event closes a block
pub fn is_block_stop(event: &StructuredEvent) -> bool {
    event.kind == CONTENT_BLOCK_STOP
}

/// Decode the block index of a block-scoped event.
///
/// A payload without a numeric `index` is an error, never index 0.
pub fn block_index(event: &StructuredEvent) -> Result<u64> {
    serde_json::from_str::<BlockIndexView>(&event.payload)
        .map(|view| view.index)
        .map_err(|e| Error::MissingIndex(format!("{} event: {}", event.kind, e)))
}

/// Extract the reasoning text carried by a `thinking_delta`.
///
/// Any other delta subtype yields an empty string; only an undecodable
/// payload is an error.
pub fn thinking_delta_text(event: &StructuredEvent) -> Result<String> {
    let view: BlockDeltaView = serde_json::from_str(&event.payload)?;
    Ok(match view.delta {
        Delta::Thinking { thinking } => thinking,
        Delta::Other => String::new(),
    })
}
