//! Error types for the bridge.
//!
//! This module defines all error types used throughout the crate and the
//! mapping from errors to the wire-level error codes.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use webview_bridge::{Bridge, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     let info = bridge.call("device.info", None).await?;
//!     println!("{info}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Wire code |
//! |----------|----------|-----------|
//! | Transport | [`Error::Parse`], [`Error::Channel`], [`Error::ChannelClosed`] | `PARSE_ERROR` |
//! | Routing | [`Error::UnknownAction`] | `UNKNOWN_ACTION` |
//! | Handler | [`Error::InvalidParameter`], [`Error::Internal`] | `INVALID_PARAMETER`, `INTERNAL_ERROR` |
//! | Protocol | [`Error::UnsupportedVersion`] | `UNSUPPORTED_VERSION` |
//! | Liveness | [`Error::Timeout`], [`Error::Cancelled`], [`Error::TornDown`] | `TIMEOUT` |
//! | Peer | [`Error::Remote`] | as sent by the peer |
//! | Local | [`Error::Config`], [`Error::DuplicateAction`] | never sent |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CorrelationId;
use crate::protocol::{ErrorBody, ErrorCode, ParseError};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the bridge builder or a service lookup is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Action registered twice in the same registry.
    ///
    /// This is a programmer error and is never reported to the peer.
    #[error("Action already registered: {action}")]
    DuplicateAction {
        /// The duplicated action name.
        action: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Inbound text could not be decoded into an envelope.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The channel rejected an outbound message.
    #[error("Channel error: {message}")]
    Channel {
        /// Description of the channel failure.
        message: String,
    },

    /// The channel is closed.
    #[error("Channel closed")]
    ChannelClosed,

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No command registered for the action.
    #[error("Unknown action: {action}")]
    UnknownAction {
        /// The unrecognized action.
        action: String,
    },

    /// Payload did not match what the command expects.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the invalid payload.
        message: String,
    },

    /// Command handler failed.
    ///
    /// Wraps any error or panic coming out of a handler.
    #[error("Internal error: {message}")]
    Internal {
        /// The handler's failure message.
        message: String,
    },

    /// Schema version not supported by this side.
    #[error("Unsupported schema version {version} (local {local})")]
    UnsupportedVersion {
        /// Version carried by the envelope.
        version: u32,
        /// Local schema version.
        local: u32,
    },

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// No response arrived before the call's timeout.
    #[error("Call {correlation_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The correlation ID that timed out.
        correlation_id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The caller cancelled the call.
    #[error("Call cancelled")]
    Cancelled,

    /// The bridge was torn down while the call was pending.
    #[error("Bridge torn down")]
    TornDown,

    /// The peer answered with an error response.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Error code sent by the peer.
        code: String,
        /// Error message sent by the peer.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a duplicate action error.
    #[inline]
    pub fn duplicate_action(action: impl Into<String>) -> Self {
        Self::DuplicateAction {
            action: action.into(),
        }
    }

    /// Creates a channel error.
    #[inline]
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Creates an unknown action error.
    #[inline]
    pub fn unknown_action(action: impl Into<String>) -> Self {
        Self::UnknownAction {
            action: action.into(),
        }
    }

    /// Creates an invalid parameter error.
    #[inline]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an unsupported version error.
    #[inline]
    pub fn unsupported_version(version: u32, local: u32) -> Self {
        Self::UnsupportedVersion { version, local }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn timeout(correlation_id: CorrelationId, timeout_ms: u64) -> Self {
        Self::Timeout {
            correlation_id,
            timeout_ms,
        }
    }

    /// Creates a remote error from a wire error body.
    #[inline]
    pub fn remote(body: ErrorBody) -> Self {
        Self::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a local timeout or a peer-reported timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Remote { code, .. } => code == ErrorCode::Timeout.as_str(),
            _ => false,
        }
    }

    /// Returns `true` if the error came from the peer's response.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if the call ended without an answer from the peer.
    #[inline]
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled | Self::TornDown
        )
    }

    /// Returns `true` if this is a channel error.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::Channel { .. } | Self::ChannelClosed | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Wire Mapping
// ============================================================================

impl Error {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::UnknownAction { .. } => ErrorCode::UnknownAction,
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
            _ => ErrorCode::InternalError,
        }
    }

    /// Converts the error into the body of an error response.
    ///
    /// Peer errors are forwarded with their original code.
    #[must_use]
    pub fn to_error_body(&self) -> ErrorBody {
        match self {
            Self::Remote { code, message } => ErrorBody::new(code.clone(), message.clone()),
            Self::InvalidParameter { message } | Self::Internal { message } => {
                ErrorBody::new(self.code().as_str(), message.clone())
            }
            other => ErrorBody::new(other.code().as_str(), other.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
