//! Error types for thinkstream

/// Result type alias using thinkstream's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for thinkstream operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A framed block carried neither an `event:` label nor a `data:` payload
    #[error("invalid event frame: {0:?}")]
    InvalidFrame(String),

    /// A single line exceeded the configured line limit
    #[error("event stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The upstream byte stream failed mid-read
    #[error("stream error: {0}")]
    Stream(String),

    /// A block-scoped payload did not carry a numeric index
    #[error("block index unavailable: {0}")]
    MissingIndex(String),

    /// Request rewriting failed
    #[error("rewrite error: {0}")]
    Rewrite(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new rewrite error
    pub fn rewrite(msg: impl Into<String>) -> Self {
        Self::Rewrite(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
