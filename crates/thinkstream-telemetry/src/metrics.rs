//! Metrics names and recording helpers
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder (e.g. the Prometheus exporter) is installed.

use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "thinkstream_requests_total";
pub const EVENTS_TOTAL: &str = "thinkstream_events_total";
pub const THINKING_BLOCKS_TOTAL: &str = "thinkstream_thinking_blocks_total";
pub const DROPPED_FRAMES_TOTAL: &str = "thinkstream_dropped_frames_total";
pub const UPSTREAM_ERRORS_TOTAL: &str = "thinkstream_upstream_errors_total";
pub const UPSTREAM_LATENCY_MS: &str = "thinkstream_upstream_latency_ms";

/// How a request is relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Filtered,
    Passthrough,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Category of upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Connect,
    Timeout,
    Status,
    Stream,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Status => "status",
            Self::Stream => "stream",
        }
    }
}

/// Register descriptions with the installed recorder
pub fn describe_metrics() {
    metrics::describe_counter!(REQUESTS_TOTAL, "Total number of proxied requests by relay mode");
    metrics::describe_counter!(
        EVENTS_TOTAL,
        "Events seen on filtered streams by action (forward, suppress)"
    );
    metrics::describe_counter!(
        THINKING_BLOCKS_TOTAL,
        "Thinking blocks removed from client responses"
    );
    metrics::describe_counter!(
        DROPPED_FRAMES_TOTAL,
        "Malformed upstream frames dropped without forwarding"
    );
    metrics::describe_counter!(UPSTREAM_ERRORS_TOTAL, "Upstream failures by kind");
    metrics::describe_histogram!(
        UPSTREAM_LATENCY_MS,
        metrics::Unit::Milliseconds,
        "Time until upstream response headers arrive"
    );
}

pub fn record_request(mode: RelayMode) {
    metrics::counter!(REQUESTS_TOTAL, "mode" => mode.as_str()).increment(1);
}

pub fn record_forwarded(count: u64) {
    metrics::counter!(EVENTS_TOTAL, "action" => "forward").increment(count);
}

pub fn record_suppressed(count: u64) {
    metrics::counter!(EVENTS_TOTAL, "action" => "suppress").increment(count);
}

pub fn record_thinking_block() {
    metrics::counter!(THINKING_BLOCKS_TOTAL).increment(1);
}

pub fn record_dropped_frame() {
    metrics::counter!(DROPPED_FRAMES_TOTAL).increment(1);
}

pub fn record_upstream_error(kind: UpstreamErrorKind) {
    metrics::counter!(UPSTREAM_ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_upstream_latency(latency: Duration) {
    metrics::histogram!(UPSTREAM_LATENCY_MS).record(latency.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_values() {
        assert_eq!(RelayMode::Filtered.as_str(), "filtered");
        assert_eq!(RelayMode::Passthrough.as_str(), "passthrough");
        assert_eq!(UpstreamErrorKind::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_request(RelayMode::Filtered);
        record_forwarded(3);
        record_suppressed(4);
        record_thinking_block();
        record_dropped_frame();
        record_upstream_error(UpstreamErrorKind::Connect);
        record_upstream_latency(Duration::from_millis(12));
    }
}
