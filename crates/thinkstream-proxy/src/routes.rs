//! HTTP routes and handlers

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use thinkstream_core::PreparedRequest;
use thinkstream_telemetry::metrics as telemetry;
use thinkstream_telemetry::RelayMode;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::proxy::{self, AppState};

/// Every path is relayed; only POSTs to the messages path are inspected
pub fn create_router(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    Router::new()
        .fallback(relay)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let request_id = proxy::generate_request_id();
    debug!(request_id = %request_id, %method, path = uri.path(), "Received request");

    let inspect = method == Method::POST && uri.path() == state.config.messages_path;
    let (body, filter_thinking) = if inspect {
        match state.rewriter.prepare(&body)? {
            PreparedRequest::Rewritten {
                body,
                original_model,
                model,
            } => {
                info!(request_id = %request_id, "Modified model name from {} to {}", original_model, model);
                (body, true)
            }
            PreparedRequest::Unchanged(reason) => {
                debug!(request_id = %request_id, ?reason, "Request passed through unmodified");
                (body, false)
            }
        }
    } else {
        (body, false)
    };

    telemetry::record_request(if filter_thinking {
        RelayMode::Filtered
    } else {
        RelayMode::Passthrough
    });

    proxy::forward_request(&state, &request_id, method, &uri, &headers, body, filter_thinking)
        .await
        .map_err(|e| {
            error!(request_id = %request_id, "Relay failed: {}", e);
            e
        })
}

/// Failures surfaced to the client before any upstream bytes are relayed
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("failed to build upstream request: {0}")]
    Request(String),

    #[error("upstream unreachable: {0}")]
    Upstream(String),

    #[error("upstream timed out: {0}")]
    Timeout(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Encode(_) | RelayError::Request(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            RelayError::Encode(_) | RelayError::Request(_) => "proxy_error",
            RelayError::Upstream(_) => "upstream_unreachable",
            RelayError::Timeout(_) => "upstream_timeout",
        }
    }
}

impl From<thinkstream_core::Error> for RelayError {
    fn from(err: thinkstream_core::Error) -> Self {
        RelayError::Encode(err.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });

        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_status_codes() {
        assert_eq!(RelayError::Encode("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(RelayError::Request("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(RelayError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(RelayError::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_core_errors_become_encode_failures() {
        let err: RelayError = thinkstream_core::Error::rewrite("boom").into();
        assert!(matches!(err, RelayError::Encode(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
