//! thinkstream Core
//!
//! Protocol core for the thinkstream proxy.
//!
//! This crate provides:
//! - Blank-line framing of an incremental event stream into raw frames
//! - Parsing frames into structured `event:`/`data:` events
//! - Classification of content-block events by kind and block type
//! - The thinking-block filter state machine
//! - Request rewriting for thinking-marked model identifiers

pub mod classifier;
pub mod error;
pub mod event;
pub mod filter;
pub mod rewrite;
pub mod segmenter;

pub use classifier::EventClass;
pub use error::{Error, Result};
pub use event::StructuredEvent;
pub use filter::{FilterStats, ThinkingBlock, ThinkingFilter, Verdict};
pub use rewrite::{PassReason, PreparedRequest, RequestRewriter, RewriteDecision, ThinkingConfig};
pub use segmenter::{EventSegmenter, FrameStream, DEFAULT_MAX_LINE_BYTES};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::StructuredEvent;
    pub use crate::filter::{ThinkingBlock, ThinkingFilter, Verdict};
    pub use crate::rewrite::{PreparedRequest, RequestRewriter};
    pub use crate::segmenter::{EventSegmenter, FrameStream};
}
