//! Disclosure channel for suppressed thinking text
//!
//! Thinking blocks removed from client responses are handed to a
//! [`DisclosureSink`]. The sink is an operator-facing side channel and never
//! writes to the client connection.

use std::fmt::Debug;
use std::sync::Mutex;
use thinkstream_core::ThinkingBlock;
use tracing::info;

const OPEN_DELIMITER: &str = "===== THINKING CONTENT =====";
const TRUNCATED_DELIMITER: &str = "===== THINKING CONTENT (TRUNCATED) =====";
const CLOSE_DELIMITER: &str = "============================";

/// Receives the reassembled text of each suppressed thinking block
pub trait DisclosureSink: Send + Sync + Debug {
    /// Name of this sink (for logging/debugging)
    fn name(&self) -> &str;

    /// Publish one block. `request_id` identifies the exchange it came from.
    fn disclose(&self, request_id: &str, block: &ThinkingBlock);
}

/// Render a block between clear delimiters
pub fn render(block: &ThinkingBlock) -> String {
    let open = if block.complete {
        OPEN_DELIMITER
    } else {
        TRUNCATED_DELIMITER
    };
    format!("\n{}\n{}\n{}\n", open, block.text, CLOSE_DELIMITER)
}

/// Writes blocks to the tracing console
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDisclosure;

impl DisclosureSink for ConsoleDisclosure {
    fn name(&self) -> &str {
        "console"
    }

    fn disclose(&self, request_id: &str, block: &ThinkingBlock) {
        info!(
            target: "thinkstream::disclosure",
            request_id,
            index = block.index,
            complete = block.complete,
            "{}",
            render(block)
        );
    }
}

/// Keeps blocks in memory, in disclosure order
#[derive(Debug, Default)]
pub struct MemoryDisclosure {
    blocks: Mutex<Vec<(String, ThinkingBlock)>>,
}

impl MemoryDisclosure {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every block disclosed so far with its request id
    pub fn blocks(&self) -> Vec<(String, ThinkingBlock)> {
        match self.blocks.lock() {
            Ok(blocks) => blocks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Texts of every block disclosed so far
    pub fn texts(&self) -> Vec<String> {
        self.blocks().into_iter().map(|(_, block)| block.text).collect()
    }
}

impl DisclosureSink for MemoryDisclosure {
    fn name(&self) -> &str {
        "memory"
    }

    fn disclose(&self, request_id: &str, block: &ThinkingBlock) {
        let mut blocks = match self.blocks.lock() {
            Ok(blocks) => blocks,
            Err(poisoned) => poisoned.into_inner(),
        };
        blocks.push((request_id.to_string(), block.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, complete: bool) -> ThinkingBlock {
        ThinkingBlock {
            index: 0,
            text: text.to_string(),
            complete,
        }
    }

    #[test]
    fn test_render_wraps_text_in_delimiters() {
        let rendered = render(&block("foobar", true));
        assert!(rendered.contains("===== THINKING CONTENT =====\nfoobar\n"));
        assert!(rendered.trim_end().ends_with(CLOSE_DELIMITER));
    }

    #[test]
    fn test_render_marks_truncated_blocks() {
        let rendered = render(&block("half", false));
        assert!(rendered.contains(TRUNCATED_DELIMITER));
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryDisclosure::new();
        sink.disclose("req_1", &block("a", true));
        sink.disclose("req_2", &block("b", true));

        assert_eq!(sink.texts(), vec!["a", "b"]);
        assert_eq!(sink.blocks()[1].0, "req_2");
    }

    #[test]
    fn test_sink_names() {
        assert_eq!(ConsoleDisclosure.name(), "console");
        assert_eq!(MemoryDisclosure::new().name(), "memory");
    }
}
