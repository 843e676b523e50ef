//! thinkstream Proxy
//!
//! Streaming HTTP/SSE proxy in front of the Anthropic Messages API.
//!
//! Requests for a thinking-marked model are rewritten to enable extended
//! thinking; the thinking blocks are then removed from the response stream
//! and disclosed on the console instead.

pub mod cli;
pub mod config;
pub mod proxy;
pub mod routes;
pub mod stream;

pub use config::ProxyConfig;
pub use proxy::AppState;
pub use routes::{create_router, RelayError};
