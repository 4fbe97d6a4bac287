//! Error taxonomy for the care reasoning service.
//!
//! Two tiers, deliberately distinct:
//! - [`RequestError`]: hard failures surfaced to the immediate caller
//!   (caller misuse or a broken backing store).
//! - [`ReasoningFailure`]: soft failures from the reasoning pipeline. These
//!   degrade the guidance attached to an event but never fail the event write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What went wrong during a reasoning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningErrorKind {
    /// Missing credentials or endpoint.
    ConfigurationError,
    /// Network failure, timeout, or a non-2xx provider response.
    TransportError,
    /// Provider output was empty, non-JSON, or had no extractable object.
    ParseError,
    /// Extracted JSON violated the output schema.
    ValidationError,
}

impl ReasoningErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningErrorKind::ConfigurationError => "configuration_error",
            ReasoningErrorKind::TransportError => "transport_error",
            ReasoningErrorKind::ParseError => "parse_error",
            ReasoningErrorKind::ValidationError => "validation_error",
        }
    }
}

/// A failed reasoning attempt, with enough context to diagnose it later.
/// Stored on the event payload; never raised to the ingestion caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningFailure {
    pub kind: ReasoningErrorKind,
    pub error: String,
    /// Raw provider text when extraction failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Extracted JSON when validation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// The request context that was sent (or would have been sent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Attempt metadata: model name, latency, request mode.
    pub ai_meta: Value,
}

impl ReasoningFailure {
    pub fn new(kind: ReasoningErrorKind, error: impl Into<String>, ai_meta: Value) -> Self {
        ReasoningFailure {
            kind,
            error: error.into(),
            raw_text: None,
            raw_output: None,
            input: None,
            ai_meta,
        }
    }
}

/// Hard request failures, mapped to HTTP statuses at the edge.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    SizeLimit(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_serializes_to_taxonomy_names() {
        let json = serde_json::to_string(&ReasoningErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"validation_error\"");
        assert_eq!(ReasoningErrorKind::TransportError.as_str(), "transport_error");
    }

    #[test]
    fn test_failure_omits_empty_context() {
        let failure = ReasoningFailure::new(
            ReasoningErrorKind::ConfigurationError,
            "CRADLE_API_KEY not set",
            json!({"model_name": "gemini-3"}),
        );
        let value = serde_json::to_value(&failure).unwrap();
        assert!(value.get("raw_text").is_none());
        assert!(value.get("raw_output").is_none());
        assert_eq!(value["kind"], "configuration_error");
    }
}
