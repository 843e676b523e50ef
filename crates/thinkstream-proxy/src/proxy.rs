//! Core proxy logic

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use futures_util::TryStreamExt;
use std::sync::Arc;
use std::time::Instant;
use thinkstream_core::{EventSegmenter, RequestRewriter};
use thinkstream_telemetry::metrics as telemetry;
use thinkstream_telemetry::{ConsoleDisclosure, DisclosureSink, UpstreamErrorKind};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::routes::RelayError;
use crate::stream::FilteredBody;

/// Headers that describe a single connection and must not be relayed
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const EVENT_STREAM: &str = "text/event-stream";

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ProxyConfig>,

    /// Rewriter for thinking-marked models
    pub rewriter: Arc<RequestRewriter>,

    /// HTTP client for upstream requests
    pub http_client: reqwest::Client,

    /// Where suppressed thinking text goes; `None` when disclosure is off
    pub disclosure: Option<Arc<dyn DisclosureSink>>,
}

impl AppState {
    /// Initialize application state from configuration
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let disclosure: Option<Arc<dyn DisclosureSink>> = if config.log_thinking {
            Some(Arc::new(ConsoleDisclosure))
        } else {
            None
        };
        Self::with_disclosure(config, disclosure)
    }

    /// Initialize application state with a specific disclosure sink
    pub fn with_disclosure(
        config: ProxyConfig,
        disclosure: Option<Arc<dyn DisclosureSink>>,
    ) -> Result<Self> {
        let rewriter = RequestRewriter::new(config.thinking_marker.clone(), config.thinking_budget);

        // Redirects belong to the client, not the proxy
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        if let Some(sink) = &disclosure {
            info!("Thinking disclosure sink: {}", sink.name());
        }

        Ok(Self {
            config: Arc::new(config),
            rewriter: Arc::new(rewriter),
            http_client,
            disclosure,
        })
    }
}

/// Build the upstream URL: target base + inbound path + inbound query
pub fn upstream_url(target_base: &str, uri: &Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}{}", target_base, path_and_query)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy client headers for the upstream request.
///
/// `host` and `content-length` are dropped: the host comes from the target
/// URL and the length is set from the final body. Filtered requests also drop
/// `accept-encoding` so the event stream arrives uncompressed.
pub fn upstream_request_headers(inbound: &HeaderMap, body_len: usize, filtered: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        if filtered && name == header::ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
    headers
}

fn copy_response_headers(upstream: &HeaderMap, response: &mut HeaderMap) {
    for (name, value) in upstream {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        response.append(name.clone(), value.clone());
    }
}

/// Send the request upstream and relay the response.
///
/// Non-success responses are relayed byte for byte without parsing. Success
/// responses are marked as an event stream and are either filtered event by
/// event or copied in bounded chunks.
pub async fn forward_request(
    state: &AppState,
    request_id: &str,
    method: Method,
    uri: &Uri,
    inbound_headers: &HeaderMap,
    body: Bytes,
    filter_thinking: bool,
) -> std::result::Result<Response, RelayError> {
    let url = upstream_url(state.config.target_base(), uri);
    let headers = upstream_request_headers(inbound_headers, body.len(), filter_thinking);

    debug!(request_id, %url, filter_thinking, "Forwarding request upstream");

    let start = Instant::now();
    let upstream = state
        .http_client
        .request(method, url.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                telemetry::record_upstream_error(UpstreamErrorKind::Timeout);
                RelayError::Timeout(e.to_string())
            } else if e.is_builder() {
                RelayError::Request(e.to_string())
            } else {
                telemetry::record_upstream_error(UpstreamErrorKind::Connect);
                RelayError::Upstream(e.to_string())
            }
        })?;
    telemetry::record_upstream_latency(start.elapsed());

    let status = upstream.status();
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    copy_response_headers(upstream.headers(), response.headers_mut());

    // If response is an error (non-2xx), just copy the body directly
    if !status.is_success() {
        warn!(request_id, status = status.as_u16(), "Upstream returned error status; relaying body unmodified");
        telemetry::record_upstream_error(UpstreamErrorKind::Status);
        *response.body_mut() = Body::from_stream(upstream.bytes_stream());
        return Ok(response);
    }

    set_event_stream_headers(response.headers_mut());

    if filter_thinking {
        let segmenter = EventSegmenter::new(state.config.max_line_bytes);
        let body = FilteredBody::new(
            upstream.bytes_stream(),
            segmenter,
            state.disclosure.clone(),
            request_id,
        );
        *response.body_mut() = Body::from_stream(body);
    } else {
        let reader = StreamReader::new(upstream.bytes_stream().map_err(std::io::Error::other));
        let chunks = ReaderStream::with_capacity(reader, state.config.relay_chunk_size);
        *response.body_mut() = Body::from_stream(chunks);
    }

    info!(request_id, status = status.as_u16(), filter_thinking, "Relaying upstream response");
    Ok(response)
}

fn set_event_stream_headers(headers: &mut HeaderMap) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
}

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url_keeps_path_and_query() {
        let uri: Uri = "/v1/messages?beta=true".parse().unwrap();
        assert_eq!(
            upstream_url("https://api.anthropic.com", &uri),
            "https://api.anthropic.com/v1/messages?beta=true"
        );

        let uri: Uri = "/v1/models".parse().unwrap();
        assert_eq!(upstream_url("http://localhost:9000", &uri), "http://localhost:9000/v1/models");
    }

    #[test]
    fn test_request_headers_drop_host_and_hop_by_hop() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:8080"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        inbound.insert("x-api-key", HeaderValue::from_static("sk-test"));
        inbound.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let headers = upstream_request_headers(&inbound, 42, false);
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "42");
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-test");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "gzip");

        let filtered = upstream_request_headers(&inbound, 42, true);
        assert!(filtered.get(header::ACCEPT_ENCODING).is_none());
    }

    #[test]
    fn test_request_headers_keep_repeated_values() {
        let mut inbound = HeaderMap::new();
        inbound.append("anthropic-beta", HeaderValue::from_static("a"));
        inbound.append("anthropic-beta", HeaderValue::from_static("b"));

        let headers = upstream_request_headers(&inbound, 0, false);
        let values: Vec<_> = headers.get_all("anthropic-beta").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_response_headers_skip_length_and_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_LENGTH, HeaderValue::from_static("99"));
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert("request-id", HeaderValue::from_static("req_abc"));

        let mut response = HeaderMap::new();
        copy_response_headers(&upstream, &mut response);
        assert!(response.get(header::CONTENT_LENGTH).is_none());
        assert!(response.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(response.get("request-id").unwrap(), "req_abc");
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
        assert!(generate_request_id().starts_with("req_"));
    }
}
