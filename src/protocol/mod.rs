//! Wire protocol.
//!
//! This module defines the envelope exchanged between the script context
//! (embedded web content) and the host context (native shell).
//!
//! # Protocol Overview
//!
//! | Envelope | Direction | Purpose |
//! |----------|-----------|---------|
//! | Call (with ID) | either | Invoke an action, expect a response |
//! | Call (no ID) | either | Fire-and-forget event |
//! | Success | either | Answer a call with `result` |
//! | Failure | either | Answer a call with `error` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | JSON encode/decode and structural classification |
//! | `envelope` | Envelope, error body and error codes |
//! | `version` | Schema version gate |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope encoding and decoding.
pub mod codec;

/// Envelope and error types.
pub mod envelope;

/// Schema version gate.
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{ParseError, decode, encode};
pub use envelope::{Envelope, EnvelopeKind, ErrorBody, ErrorCode, READY_ACTION};
pub use version::{CURRENT_SCHEMA_VERSION, VersionGate};
