//! Structured server-sent events
//!
//! A raw frame is the text between two blank lines:
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"..."}}
//! ```
//! Only the `event:` and `data:` lines are recognized; anything else in the
//! frame (`id:`, `retry:`, comments) is ignored.

use bytes::Bytes;

use crate::{Error, Result};

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// One decoded unit of the upstream event stream.
///
/// `payload` is kept exactly as received (after prefix whitespace trimming)
/// so that forwarding never re-encodes the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredEvent {
    /// The `event:` label, empty when the frame carried none
    pub kind: String,

    /// The `data:` body, empty when the frame carried none
    pub payload: String,
}

impl StructuredEvent {
    /// Create an event from its label and payload
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Parse one raw frame into an event.
    ///
    /// When a frame repeats a prefix, the last occurrence wins. A frame that
    /// yields neither a label nor a payload is rejected with
    /// [`Error::InvalidFrame`].
    pub fn parse(frame: &str) -> Result<Self> {
        let mut kind = "";
        let mut payload = "";

        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
                kind = rest.trim();
            } else if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
                payload = rest.trim();
            }
        }

        if kind.is_empty() && payload.is_empty() {
            return Err(Error::InvalidFrame(frame.trim().to_string()));
        }

        Ok(Self::new(kind, payload))
    }

    /// Serialize back to wire form, terminated by a blank line.
    ///
    /// A missing label or payload is omitted rather than written empty.
    pub fn to_wire(&self) -> Bytes {
        let mut out = String::with_capacity(self.kind.len() + self.payload.len() + 16);
        if !self.kind.is_empty() {
            out.push_str("event: ");
            out.push_str(&self.kind);
            out.push('\n');
        }
        if !self.payload.is_empty() {
            out.push_str("data: ");
            out.push_str(&self.payload);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}
