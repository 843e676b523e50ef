//! Response body streams
//!
//! [`FilteredBody`] turns the upstream byte stream into the client-visible
//! event stream: frames are parsed, run through the thinking filter, and
//! each forwarded event is yielded as its own chunk so the server flushes it
//! immediately. Dropping the body (client went away) drops the upstream
//! response with it.

use bytes::Bytes;
use futures::Stream;
use pin_project::{pin_project, pinned_drop};
use std::fmt::Display;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thinkstream_core::{
    EventSegmenter, FrameStream, StructuredEvent, ThinkingBlock, ThinkingFilter, Verdict,
};
use thinkstream_telemetry::metrics as telemetry;
use thinkstream_telemetry::{DisclosureSink, UpstreamErrorKind};
use tracing::{debug, info, warn};

/// Client-facing body of a filtered response
#[pin_project(PinnedDrop)]
pub struct FilteredBody<S> {
    #[pin]
    frames: FrameStream<S>,
    filter: ThinkingFilter,
    disclosure: Option<Arc<dyn DisclosureSink>>,
    request_id: String,
    finished: bool,
}

impl<S> FilteredBody<S> {
    /// Filter `upstream`, disclosing closed thinking blocks to `disclosure`
    pub fn new(
        upstream: S,
        segmenter: EventSegmenter,
        disclosure: Option<Arc<dyn DisclosureSink>>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            frames: FrameStream::new(upstream, segmenter),
            filter: ThinkingFilter::new(),
            disclosure,
            request_id: request_id.into(),
            finished: false,
        }
    }
}

fn disclose(
    disclosure: &Option<Arc<dyn DisclosureSink>>,
    request_id: &str,
    block: &ThinkingBlock,
) {
    if let Some(sink) = disclosure {
        sink.disclose(request_id, block);
    }
}

fn complete(
    filter: &mut ThinkingFilter,
    disclosure: &Option<Arc<dyn DisclosureSink>>,
    request_id: &str,
) {
    if let Some(block) = filter.finish() {
        warn!(
            request_id,
            index = block.index,
            "Upstream stream ended inside a thinking block"
        );
        disclose(disclosure, request_id, &block);
    }

    let stats = filter.stats();
    telemetry::record_forwarded(stats.forwarded);
    telemetry::record_suppressed(stats.suppressed);
    info!(
        request_id,
        forwarded = stats.forwarded,
        suppressed = stats.suppressed,
        thinking_blocks = stats.blocks_closed,
        "Filtered stream complete"
    );
}

impl<S, B, E> Stream for FilteredBody<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.finished {
                return Poll::Ready(None);
            }

            match futures::ready!(this.frames.as_mut().poll_next(cx)) {
                Some(Ok(frame)) => {
                    let event = match StructuredEvent::parse(&frame) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(request_id = %this.request_id, "Error parsing SSE: {}", e);
                            telemetry::record_dropped_frame();
                            continue;
                        }
                    };

                    match this.filter.process(&event) {
                        Verdict::Forward => return Poll::Ready(Some(Ok(event.to_wire()))),
                        Verdict::Suppress => {
                            debug!(request_id = %this.request_id, kind = %event.kind, "Suppressed event");
                        }
                        Verdict::Closed(block) => {
                            telemetry::record_thinking_block();
                            disclose(this.disclosure, this.request_id.as_str(), &block);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(request_id = %this.request_id, "Error reading SSE stream: {}", e);
                    telemetry::record_upstream_error(UpstreamErrorKind::Stream);
                    *this.finished = true;
                    complete(this.filter, this.disclosure, this.request_id.as_str());
                    return Poll::Ready(Some(Err(io::Error::other(e))));
                }
                None => {
                    *this.finished = true;
                    complete(this.filter, this.disclosure, this.request_id.as_str());
                    return Poll::Ready(None);
                }
            }
        }
    }
}

#[pinned_drop]
impl<S> PinnedDrop for FilteredBody<S> {
    fn drop(self: Pin<&mut Self>) {
        if !self.finished {
            debug!(
                request_id = %self.request_id,
                "Client disconnected before upstream stream completed; releasing upstream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use thinkstream_telemetry::MemoryDisclosure;

    const SCENARIO: &str = concat!(
        "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"foo\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"bar\"}}\n\n",
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
    );

    fn chunked(body: &str, size: usize) -> Vec<Result<Bytes, io::Error>> {
        body.as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn collect<S>(body: FilteredBody<S>) -> String
    where
        FilteredBody<S>: Stream<Item = io::Result<Bytes>>,
    {
        let chunks: Vec<_> = body.collect().await;
        chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_filters_thinking_and_discloses() {
        let sink = Arc::new(MemoryDisclosure::new());
        let body = FilteredBody::new(
            stream::iter(chunked(SCENARIO, 7)),
            EventSegmenter::default(),
            Some(sink.clone() as Arc<dyn DisclosureSink>),
            "req_test",
        );

        let output = collect(body).await;
        let expected: String = SCENARIO
            .split("\n\n")
            .filter(|f| !f.is_empty())
            .enumerate()
            .filter(|(i, _)| *i == 0 || *i >= 5)
            .map(|(_, f)| format!("{}\n\n", f))
            .collect();

        assert_eq!(output, expected);
        assert_eq!(sink.texts(), vec!["foobar"]);
        assert_eq!(sink.blocks()[0].0, "req_test");
    }

    #[tokio::test]
    async fn test_each_forwarded_event_is_its_own_chunk() {
        let body = FilteredBody::new(
            stream::iter(chunked(SCENARIO, SCENARIO.len())),
            EventSegmenter::default(),
            None,
            "req_test",
        );
        let chunks: Vec<_> = body.collect().await;
        assert_eq!(chunks.len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_not_fatal() {
        let input = ": just a comment\n\nevent: ping\ndata: {}\n\n";
        let body = FilteredBody::new(
            stream::iter(chunked(input, 3)),
            EventSegmenter::default(),
            None,
            "req_test",
        );
        assert_eq!(collect(body).await, "event: ping\ndata: {}\n\n");
    }

    #[tokio::test]
    async fn test_disclosure_disabled() {
        let body = FilteredBody::new(
            stream::iter(chunked(SCENARIO, 64)),
            EventSegmenter::default(),
            None,
            "req_test",
        );
        let output = collect(body).await;
        assert!(!output.contains("thinking"));
    }

    #[tokio::test]
    async fn test_truncated_thinking_block_is_disclosed_incomplete() {
        let input = concat!(
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"cut\"}}\n\n",
        );
        let sink = Arc::new(MemoryDisclosure::new());
        let body = FilteredBody::new(
            stream::iter(chunked(input, 16)),
            EventSegmenter::default(),
            Some(sink.clone() as Arc<dyn DisclosureSink>),
            "req_test",
        );

        assert_eq!(collect(body).await, "");
        let blocks = sink.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].1.text, "cut");
        assert!(!blocks[0].1.complete);
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream_with_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"event: ping\ndata: {}\n\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut body =
            FilteredBody::new(stream::iter(chunks), EventSegmenter::default(), None, "req_test");

        assert!(body.next().await.unwrap().is_ok());
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());
    }
}
