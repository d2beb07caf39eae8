//! Envelope types.
//!
//! An envelope is exactly one of three shapes:
//!
//! | Kind | Has `action` | Has `correlationId` | Has `result` / `error` |
//! |------|--------------|---------------------|------------------------|
//! | Call | yes | optional | neither |
//! | Success | no | yes | `result` |
//! | Failure | no | yes | `error` |
//!
//! A call without a correlation ID is fire-and-forget (an event).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::CorrelationId;

// ============================================================================
// Constants
// ============================================================================

/// Reserved action sent by a runtime once it has finished initializing.
///
/// Carries no payload and no correlation ID.
pub const READY_ACTION: &str = "bridge.ready";

// ============================================================================
// Envelope
// ============================================================================

/// The unit of wire communication.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sender's protocol version.
    pub schema_version: u32,

    /// Call or response body.
    pub kind: EnvelopeKind,
}

/// The three envelope shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeKind {
    /// Invoke an action on the peer.
    Call {
        /// Present when a response is expected.
        correlation_id: Option<CorrelationId>,
        /// Command name.
        action: String,
        /// Action-specific arguments.
        payload: Option<Value>,
    },

    /// Successful response.
    Success {
        /// ID of the call being answered.
        correlation_id: CorrelationId,
        /// Handler result (may be `null`).
        result: Value,
    },

    /// Failed response.
    Failure {
        /// ID of the call being answered.
        correlation_id: CorrelationId,
        /// Structured failure.
        error: ErrorBody,
    },
}

impl Envelope {
    /// Creates a call envelope expecting a response.
    #[inline]
    #[must_use]
    pub fn call(
        schema_version: u32,
        correlation_id: CorrelationId,
        action: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            schema_version,
            kind: EnvelopeKind::Call {
                correlation_id: Some(correlation_id),
                action: action.into(),
                payload,
            },
        }
    }

    /// Creates a fire-and-forget call envelope.
    #[inline]
    #[must_use]
    pub fn event(schema_version: u32, action: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            schema_version,
            kind: EnvelopeKind::Call {
                correlation_id: None,
                action: action.into(),
                payload,
            },
        }
    }

    /// Creates the ready signal.
    #[inline]
    #[must_use]
    pub fn ready(schema_version: u32) -> Self {
        Self::event(schema_version, READY_ACTION, None)
    }

    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(schema_version: u32, correlation_id: CorrelationId, result: Value) -> Self {
        Self {
            schema_version,
            kind: EnvelopeKind::Success {
                correlation_id,
                result,
            },
        }
    }

    /// Creates a failure response.
    #[inline]
    #[must_use]
    pub fn failure(schema_version: u32, correlation_id: CorrelationId, error: ErrorBody) -> Self {
        Self {
            schema_version,
            kind: EnvelopeKind::Failure {
                correlation_id,
                error,
            },
        }
    }

    /// Returns the correlation ID, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match &self.kind {
            EnvelopeKind::Call { correlation_id, .. } => correlation_id.as_ref(),
            EnvelopeKind::Success { correlation_id, .. }
            | EnvelopeKind::Failure { correlation_id, .. } => Some(correlation_id),
        }
    }

    /// Returns the action for call envelopes.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        match &self.kind {
            EnvelopeKind::Call { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Returns `true` for call envelopes.
    #[inline]
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Call { .. })
    }

    /// Returns `true` for success and failure responses.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        !self.is_call()
    }

    /// Returns `true` if this is the ready signal.
    #[inline]
    #[must_use]
    pub fn is_ready_signal(&self) -> bool {
        self.action() == Some(READY_ACTION)
    }
}

// ============================================================================
// ErrorBody
// ============================================================================

/// Error object carried by failure responses.
///
/// `code` is kept as a string: peers may send codes this side does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code, usually one of [`ErrorCode`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the standard code, if the code is one.
    #[inline]
    #[must_use]
    pub fn standard_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_wire(&self.code)
    }
}

// ============================================================================
// ErrorCode
// ============================================================================

/// Standard error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed envelope.
    ParseError,
    /// No command registered for the action.
    UnknownAction,
    /// Payload rejected by the command.
    InvalidParameter,
    /// No response in time.
    Timeout,
    /// Version not supported.
    UnsupportedVersion,
    /// Handler failure.
    InternalError,
}

impl ErrorCode {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::Timeout => "TIMEOUT",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "PARSE_ERROR" => Some(Self::ParseError),
            "UNKNOWN_ACTION" => Some(Self::UnknownAction),
            "INVALID_PARAMETER" => Some(Self::InvalidParameter),
            "TIMEOUT" => Some(Self::Timeout),
            "UNSUPPORTED_VERSION" => Some(Self::UnsupportedVersion),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
