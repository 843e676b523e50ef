//! Request rewriting
//!
//! A model identifier carrying the thinking marker (e.g.
//! `claude-3-7-sonnet-20250219-thinking`) asks the proxy to enable extended
//! thinking upstream. The rewritten request gets the marker removed from
//! `model`, a `thinking` capability object with the configured budget, and
//! `stream: true`. Every other request body is forwarded byte for byte.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Marker substring selecting the extended-thinking variant of a model
pub const DEFAULT_THINKING_MARKER: &str = "-thinking";

/// Default reasoning token budget
pub const DEFAULT_THINKING_BUDGET: u32 = 1024;

/// Capability object injected as the `thinking` field
#[derive(Debug, Clone, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    /// Enabled thinking with the given budget
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled",
            budget_tokens,
        }
    }
}

/// What to do with one request, derived from its `model` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteDecision {
    /// Forward the body untouched
    PassThrough,
    /// Rewrite the body and filter the response
    Rewrite {
        original_model: String,
        model: String,
        budget_tokens: u32,
    },
}

impl RewriteDecision {
    /// Whether the request is rewritten (and its response filtered)
    pub fn should_rewrite(&self) -> bool {
        matches!(self, Self::Rewrite { .. })
    }
}

/// Why a body was left unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// Body is not valid JSON
    Malformed,
    /// Body is JSON but not an object
    NotAnObject,
    /// No string `model` field
    NoModel,
    /// `model` does not contain the marker
    NoMarker,
}

/// Body ready to send upstream
#[derive(Debug, Clone)]
pub enum PreparedRequest {
    /// The original bytes are sent as-is
    Unchanged(PassReason),
    /// A re-encoded body whose response must be filtered
    Rewritten {
        body: Bytes,
        original_model: String,
        model: String,
    },
}

impl PreparedRequest {
    /// Whether the upstream response needs thinking-block filtering
    pub fn requires_filtering(&self) -> bool {
        matches!(self, Self::Rewritten { .. })
    }
}

/// Rewrites requests for thinking-marked models
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    marker: String,
    budget_tokens: u32,
}

impl RequestRewriter {
    /// Create a rewriter for `marker` injecting `budget_tokens`
    pub fn new(marker: impl Into<String>, budget_tokens: u32) -> Self {
        Self {
            marker: marker.into(),
            budget_tokens,
        }
    }

    /// Configured marker substring
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Configured budget
    pub fn budget_tokens(&self) -> u32 {
        self.budget_tokens
    }

    /// Decide from the requested model identifier alone
    pub fn decide(&self, model: Option<&str>) -> RewriteDecision {
        match model {
            Some(model) if model.contains(&self.marker) => RewriteDecision::Rewrite {
                original_model: model.to_string(),
                model: model.replacen(&self.marker, "", 1),
                budget_tokens: self.budget_tokens,
            },
            _ => RewriteDecision::PassThrough,
        }
    }

    /// Inspect a raw request body and produce what should be sent upstream.
    ///
    /// Bodies that cannot be introspected are passed through, never rejected.
    /// Only a failure to re-encode a rewritten body is an error.
    pub fn prepare(&self, body: &[u8]) -> Result<PreparedRequest> {
        let object = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return Ok(PreparedRequest::Unchanged(PassReason::NotAnObject)),
            Err(_) => return Ok(PreparedRequest::Unchanged(PassReason::Malformed)),
        };

        let model = object.get("model").and_then(Value::as_str);
        if model.is_none() {
            return Ok(PreparedRequest::Unchanged(PassReason::NoModel));
        }

        match self.decide(model) {
            RewriteDecision::PassThrough => Ok(PreparedRequest::Unchanged(PassReason::NoMarker)),
            RewriteDecision::Rewrite {
                original_model,
                model,
                budget_tokens,
            } => {
                let body = Self::apply(object, &model, budget_tokens)?;
                Ok(PreparedRequest::Rewritten {
                    body,
                    original_model,
                    model,
                })
            }
        }
    }

    fn apply(mut object: Map<String, Value>, model: &str, budget_tokens: u32) -> Result<Bytes> {
        let thinking = serde_json::to_value(ThinkingConfig::enabled(budget_tokens))
            .map_err(|e| Error::rewrite(format!("failed to encode thinking config: {}", e)))?;

        object.insert("model".to_string(), Value::String(model.to_string()));
        object.insert("thinking".to_string(), thinking);
        object.insert("stream".to_string(), Value::Bool(true));

        serde_json::to_vec(&object)
            .map(Bytes::from)
            .map_err(|e| Error::rewrite(format!("failed to re-encode request body: {}", e)))
    }
}

impl Default for RequestRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_THINKING_MARKER, DEFAULT_THINKING_BUDGET)
    }
}
