//! Event segmentation
//!
//! Splits an incrementally delivered byte stream into raw event frames. A
//! frame is every non-empty line up to the next blank line. A partial frame
//! left over at end of stream is incomplete and is discarded. Frames holding
//! invalid UTF-8 are dropped whole so forwarded frames stay byte-identical.

use bytes::{Buf, BytesMut};
use futures::Stream;
use pin_project::pin_project;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Default upper bound for a single line (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental blank-line framer
#[derive(Debug)]
pub struct EventSegmenter {
    /// Bytes not yet terminated by a newline
    buffer: BytesMut,

    /// Prefix of `buffer` already known to contain no newline
    scanned: usize,

    /// Lines of the frame currently being assembled
    frame: String,

    /// Current frame contained a line that is not UTF-8
    frame_invalid: bool,

    max_line_bytes: usize,
}

impl EventSegmenter {
    /// Create a segmenter that rejects lines longer than `max_line_bytes`
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            frame: String::new(),
            frame_invalid: false,
            max_line_bytes,
        }
    }

    /// Feed a chunk of bytes and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = 0;

            if end > self.max_line_bytes {
                return Err(Error::LineTooLong {
                    limit: self.max_line_bytes,
                });
            }

            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);

            if line.is_empty() {
                if self.frame_invalid {
                    warn!(bytes = self.frame.len(), "Dropping frame with invalid UTF-8");
                    self.frame.clear();
                    self.frame_invalid = false;
                } else if !self.frame.is_empty() {
                    frames.push(std::mem::take(&mut self.frame));
                }
                continue;
            }

            match std::str::from_utf8(line) {
                Ok(text) => {
                    self.frame.push_str(text);
                    self.frame.push('\n');
                }
                Err(_) => self.frame_invalid = true,
            }
        }

        self.scanned = self.buffer.len();
        if self.scanned > self.max_line_bytes {
            return Err(Error::LineTooLong {
                limit: self.max_line_bytes,
            });
        }

        Ok(frames)
    }

    /// End of input. Returns the number of bytes discarded as an incomplete
    /// trailing frame.
    pub fn finish(&mut self) -> usize {
        let discarded = self.frame.len() + self.buffer.len();
        self.frame.clear();
        self.frame_invalid = false;
        self.buffer.clear();
        self.scanned = 0;
        discarded
    }
}

impl Default for EventSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

/// Adapts a byte stream into a stream of raw frames.
///
/// Single forward pass: after the first error or the end of input the stream
/// is exhausted.
#[pin_project]
pub struct FrameStream<S> {
    #[pin]
    inner: S,
    segmenter: EventSegmenter,
    ready: VecDeque<String>,
    done: bool,
}

impl<S> FrameStream<S> {
    /// Wrap `inner` with a fresh segmenter
    pub fn new(inner: S, segmenter: EventSegmenter) -> Self {
        Self {
            inner,
            segmenter,
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, B, E> Stream for FrameStream<S>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match futures::ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => match this.segmenter.push(chunk.as_ref()) {
                    Ok(frames) => this.ready.extend(frames),
                    Err(e) => {
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(Error::stream(e.to_string()))));
                }
                None => {
                    *this.done = true;
                    let discarded = this.segmenter.finish();
                    if discarded > 0 {
                        debug!(discarded, "Discarding incomplete trailing frame");
                    }
                }
            }
        }
    }
}
