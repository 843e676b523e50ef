//! Thinking-block filter
//!
//! Decides, one event at a time and in stream order, whether an event is
//! forwarded to the client or suppressed. While a thinking block is open its
//! deltas are accumulated so the full reasoning text can be disclosed on a
//! side channel when the block closes.
//!
//! Only one thinking block is tracked at a time. A second thinking block that
//! opens before the first closes replaces it, and the first block's partial
//! text is dropped without disclosure.

use tracing::{debug, info, warn};

use crate::classifier::{self, EventClass};
use crate::event::StructuredEvent;

/// Reasoning text reassembled from one suppressed thinking block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingBlock {
    /// Block index the text belonged to
    pub index: u64,

    /// Concatenated `thinking_delta` fragments, in arrival order
    pub text: String,

    /// False when the stream ended before the block's `content_block_stop`
    pub complete: bool,
}

/// Outcome of feeding one event to the filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Emit the event to the client unchanged
    Forward,
    /// Drop the event
    Suppress,
    /// Drop the event; it closed the active thinking block
    Closed(ThinkingBlock),
}

impl Verdict {
    /// Whether the event should reach the client
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward)
    }
}

#[derive(Debug, Default)]
enum FilterState {
    #[default]
    Idle,
    Suppressing {
        index: u64,
        fragments: Vec<String>,
    },
}

/// Running counters for one filtered response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub forwarded: u64,
    pub suppressed: u64,
    pub blocks_closed: u64,
}

/// Per-response thinking-block state machine
#[derive(Debug, Default)]
pub struct ThinkingFilter {
    state: FilterState,
    stats: FilterStats,
}

impl ThinkingFilter {
    /// Create a filter in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the thinking block currently being suppressed
    pub fn active_index(&self) -> Option<u64> {
        match self.state {
            FilterState::Idle => None,
            FilterState::Suppressing { index, .. } => Some(index),
        }
    }

    /// Whether a thinking block is currently open
    pub fn is_active(&self) -> bool {
        self.active_index().is_some()
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Feed the next event of the stream
    pub fn process(&mut self, event: &StructuredEvent) -> Verdict {
        let verdict = match classifier::classify(event) {
            EventClass::ThinkingOpen => self.open_block(event),
            EventClass::BlockDelta => self.delta(event),
            EventClass::BlockStop => self.stop(event),
            EventClass::Other => Verdict::Forward,
        };

        match verdict {
            Verdict::Forward => self.stats.forwarded += 1,
            Verdict::Suppress => self.stats.suppressed += 1,
            Verdict::Closed(_) => {
                self.stats.suppressed += 1;
                self.stats.blocks_closed += 1;
            }
        }
        verdict
    }

    /// End of stream. Returns the partial text of a block that never closed.
    pub fn finish(&mut self) -> Option<ThinkingBlock> {
        match std::mem::take(&mut self.state) {
            FilterState::Idle => None,
            FilterState::Suppressing { index, fragments } => Some(ThinkingBlock {
                index,
                text: fragments.concat(),
                complete: false,
            }),
        }
    }

    fn open_block(&mut self, event: &StructuredEvent) -> Verdict {
        let index = match classifier::block_index(event) {
            Ok(index) => index,
            Err(e) => {
                warn!("Thinking block start without usable index, forwarding: {}", e);
                return Verdict::Forward;
            }
        };

        if let FilterState::Suppressing {
            index: previous,
            fragments,
        } = &self.state
        {
            warn!(
                previous,
                index,
                discarded_fragments = fragments.len(),
                "Thinking block opened while another was active; dropping partial text"
            );
        }

        info!(index, "Found thinking block");
        self.state = FilterState::Suppressing {
            index,
            fragments: Vec::new(),
        };
        Verdict::Suppress
    }

    fn delta(&mut self, event: &StructuredEvent) -> Verdict {
        let FilterState::Suppressing { index, fragments } = &mut self.state else {
            return Verdict::Forward;
        };

        match classifier::block_index(event) {
            Ok(i) if i == *index => {}
            _ => return Verdict::Forward,
        }

        match classifier::thinking_delta_text(event) {
            Ok(text) if !text.is_empty() => fragments.push(text),
            Ok(_) => {}
            Err(e) => warn!(index = *index, "Undecodable thinking delta: {}", e),
        }
        debug!(index = *index, "Suppressed thinking delta");
        Verdict::Suppress
    }

    fn stop(&mut self, event: &StructuredEvent) -> Verdict {
        let Some(active) = self.active_index() else {
            return Verdict::Forward;
        };

        match classifier::block_index(event) {
            Ok(i) if i == active => {}
            _ => return Verdict::Forward,
        }

        match std::mem::take(&mut self.state) {
            FilterState::Suppressing { index, fragments } => {
                let text = fragments.concat();
                info!(index, chars = text.chars().count(), "Thinking block closed");
                Verdict::Closed(ThinkingBlock {
                    index,
                    text,
                    complete: true,
                })
            }
            FilterState::Idle => Verdict::Forward,
        }
    }
}
