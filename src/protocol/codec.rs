//! Envelope codec.
//!
//! Wire format:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "correlationId": "uuid",
//!   "action": "module.name",
//!   "payload": { ... },
//!   "result": { ... },
//!   "error": { "code": "UNKNOWN_ACTION", "message": "..." }
//! }
//! ```
//!
//! Decoding classifies by structure only: `action` present means call,
//! `correlationId` without `action` means response. `payload` and `result`
//! are opaque and never inspected. Unknown fields are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::identifiers::CorrelationId;

use super::envelope::{Envelope, EnvelopeKind, ErrorBody};

// ============================================================================
// Wire Representation
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    payload: Option<Value>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

/// Keeps an explicit `null` distinct from an absent field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> StdResult<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let mut wire = Self {
            schema_version: envelope.schema_version,
            correlation_id: None,
            action: None,
            payload: None,
            result: None,
            error: None,
        };

        match &envelope.kind {
            EnvelopeKind::Call {
                correlation_id,
                action,
                payload,
            } => {
                wire.correlation_id = correlation_id.clone();
                wire.action = Some(action.clone());
                wire.payload = payload.clone();
            }
            EnvelopeKind::Success {
                correlation_id,
                result,
            } => {
                wire.correlation_id = Some(correlation_id.clone());
                wire.result = Some(result.clone());
            }
            EnvelopeKind::Failure {
                correlation_id,
                error,
            } => {
                wire.correlation_id = Some(correlation_id.clone());
                wire.error = Some(error.clone());
            }
        }

        wire
    }
}

// ============================================================================
// ParseError
// ============================================================================

/// Inbound text that is not a valid envelope.
///
/// Keeps the raw text for diagnostics, plus whatever could be salvaged from
/// it so the caller can still answer with `PARSE_ERROR`.
#[derive(Debug, Clone, Error)]
#[error("Parse error: {message}")]
pub struct ParseError {
    message: String,
    raw: String,
    correlation_id: Option<CorrelationId>,
    schema_version: Option<u64>,
    has_action: bool,
}

impl ParseError {
    /// Creates a parse error, salvaging what it can from `raw`.
    pub fn new(message: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let object = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            });

        let (correlation_id, schema_version, has_action) = match &object {
            Some(map) => (
                map.get("correlationId")
                    .and_then(Value::as_str)
                    .map(CorrelationId::from),
                map.get("schemaVersion").and_then(Value::as_u64),
                map.contains_key("action"),
            ),
            None => (None, None, false),
        };

        Self {
            message: message.into(),
            raw,
            correlation_id,
            schema_version,
            has_action,
        }
    }

    /// Returns the decoder's message.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the raw inbound text.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the correlation ID found in the raw text, if any.
    #[inline]
    #[must_use]
    pub fn salvaged_correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Returns the schema version found in the raw text, if any.
    #[inline]
    #[must_use]
    pub fn salvaged_schema_version(&self) -> Option<u64> {
        self.schema_version
    }

    /// Returns `true` if the raw text had an `action` key.
    #[inline]
    #[must_use]
    pub fn had_action(&self) -> bool {
        self.has_action
    }
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Encodes an envelope into its wire string.
///
/// # Errors
///
/// Returns [`crate::Error::Json`] if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(&WireEnvelope::from(envelope))?)
}

/// Decodes a wire string into an envelope.
///
/// # Errors
///
/// Returns [`ParseError`] if the text is not JSON, lacks `schemaVersion`, or
/// is missing the fields its inferred kind requires.
pub fn decode(raw: &str) -> StdResult<Envelope, ParseError> {
    let wire: WireEnvelope =
        serde_json::from_str(raw).map_err(|e| ParseError::new(e.to_string(), raw))?;

    let kind = match (wire.action, wire.correlation_id) {
        (Some(action), correlation_id) => {
            if wire.result.is_some() || wire.error.is_some() {
                return Err(ParseError::new(
                    "call envelope must not carry result or error",
                    raw,
                ));
            }
            if action.is_empty() {
                return Err(ParseError::new("call envelope has an empty action", raw));
            }
            EnvelopeKind::Call {
                correlation_id,
                action,
                payload: wire.payload,
            }
        }

        (None, Some(correlation_id)) => {
            if wire.payload.is_some() {
                return Err(ParseError::new(
                    "response envelope must not carry payload",
                    raw,
                ));
            }
            match (wire.result, wire.error) {
                (Some(result), None) => EnvelopeKind::Success {
                    correlation_id,
                    result,
                },
                (None, Some(error)) => EnvelopeKind::Failure {
                    correlation_id,
                    error,
                },
                (Some(_), Some(_)) => {
                    return Err(ParseError::new(
                        "response envelope carries both result and error",
                        raw,
                    ));
                }
                (None, None) => {
                    return Err(ParseError::new(
                        "response envelope carries neither result nor error",
                        raw,
                    ));
                }
            }
        }

        (None, None) => {
            return Err(ParseError::new(
                "envelope has neither action nor correlationId",
                raw,
            ));
        }
    };

    Ok(Envelope {
        schema_version: wire.schema_version,
        kind,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encode_call() {
        let id = CorrelationId::from("abc");
        let envelope = Envelope::call(1, id, "echo", Some(json!({"x": 1})));
        let wire: Value = serde_json::from_str(&encode(&envelope).expect("encode")).expect("json");

        assert_eq!(
            wire,
            json!({
                "schemaVersion": 1,
                "correlationId": "abc",
                "action": "echo",
                "payload": {"x": 1}
            })
        );
    }

    #[test]
    fn test_encode_event_omits_correlation() {
        let json = encode(&Envelope::event(1, "toast.show", None)).expect("encode");
        assert!(!json.contains("correlationId"));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_null_result_survives() {
        let envelope = Envelope::success(1, CorrelationId::from("n"), Value::Null);
        let json = encode(&envelope).expect("encode");
        assert!(json.contains("\"result\":null"));

        let decoded = decode(&json).expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_failure_response() {
        let raw = r#"{
            "schemaVersion": 1,
            "correlationId": "c-1",
            "error": {"code": "UNKNOWN_ACTION", "message": "no such action"}
        }"#;

        let envelope = decode(raw).expect("decode");
        match envelope.kind {
            EnvelopeKind::Failure {
                correlation_id,
                error,
            } => {
                assert_eq!(correlation_id.as_str(), "c-1");
                assert_eq!(error.code, "UNKNOWN_ACTION");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let raw = r#"{"schemaVersion": 1, "action": "ping", "traceId": "t"}"#;
        assert!(decode(raw).expect("decode").is_call());
    }

    #[test]
    fn test_decode_missing_version() {
        let err = decode(r#"{"action": "ping"}"#).unwrap_err();
        assert!(err.message().contains("schemaVersion"));
        assert_eq!(err.raw(), r#"{"action": "ping"}"#);
    }

    #[test]
    fn test_decode_rejects_ambiguous_response() {
        let raw = r#"{"schemaVersion": 1, "correlationId": "c", "result": 1, "error": {"code": "X", "message": "y"}}"#;
        let err = decode(raw).unwrap_err();
        assert_eq!(err.salvaged_correlation_id().map(|id| id.as_str()), Some("c"));
        assert!(!err.had_action());
    }

    #[test]
    fn test_salvage_from_bad_action_type() {
        let raw = r#"{"schemaVersion": 4, "correlationId": "c-9", "action": 12}"#;
        let err = decode(raw).unwrap_err();

        assert_eq!(err.salvaged_correlation_id().map(|id| id.as_str()), Some("c-9"));
        assert_eq!(err.salvaged_schema_version(), Some(4));
        assert!(err.had_action());
    }

    #[test]
    fn test_not_json() {
        let err = decode("hello").unwrap_err();
        assert!(err.salvaged_correlation_id().is_none());
        assert!(err.salvaged_schema_version().is_none());
    }

    proptest! {
        #[test]
        fn decode_never_panics(raw in ".*") {
            let _ = decode(&raw);
        }

        #[test]
        fn classification_is_structural(
            has_action in any::<bool>(),
            has_id in any::<bool>(),
            has_payload in any::<bool>(),
            has_result in any::<bool>(),
            has_error in any::<bool>(),
        ) {
            let mut object = serde_json::Map::new();
            object.insert("schemaVersion".into(), json!(1));
            if has_action { object.insert("action".into(), json!("a")); }
            if has_id { object.insert("correlationId".into(), json!("id")); }
            if has_payload { object.insert("payload".into(), json!({"k": 1})); }
            if has_result { object.insert("result".into(), Value::Null); }
            if has_error { object.insert("error".into(), json!({"code": "C", "message": "m"})); }
            let raw = Value::Object(object).to_string();

            let expected_ok = if has_action {
                !has_result && !has_error
            } else if has_id {
                !has_payload && (has_result != has_error)
            } else {
                false
            };

            match decode(&raw) {
                Ok(envelope) => {
                    prop_assert!(expected_ok);
                    prop_assert_eq!(envelope.is_call(), has_action);
                }
                Err(_) => prop_assert!(!expected_ok),
            }
        }
    }
}
