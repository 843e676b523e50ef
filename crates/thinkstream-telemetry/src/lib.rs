//! thinkstream Telemetry
//!
//! Side channels for the thinkstream proxy.
//!
//! Provides:
//! - The disclosure channel for reassembled thinking text
//! - Metric names and recording helpers

pub mod disclosure;
pub mod metrics;

pub use disclosure::{ConsoleDisclosure, DisclosureSink, MemoryDisclosure};
pub use metrics::{RelayMode, UpstreamErrorKind};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::disclosure::{ConsoleDisclosure, DisclosureSink};
    pub use crate::metrics::{RelayMode, UpstreamErrorKind};
}
