//! WebView Bridge - Bidirectional message bridge between embedded web
//! content and a native host.
//!
//! Both sides speak the same JSON envelope over a string channel. Either
//! side can call named actions on the other, get a correlated answer or a
//! timeout, and send fire-and-forget events.
//!
//! # Architecture
//!
//! - **Host (native)**: registers commands, runs inbound calls on its UI
//!   thread, calls into the script context
//! - **Script (web content)**: announces readiness, calls host commands,
//!   runs inbound calls on its single-threaded queue
//!
//! Key design principles:
//!
//! - One [`Bridge`] per side; both sides are symmetric
//! - Every call carries a finite timeout; every pending call completes
//!   exactly once (answer, timeout, cancel or teardown)
//! - Newer-schema envelopes are dropped, never guessed at
//! - Handler failures and panics become error responses, never crashes
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use webview_bridge::{Bridge, ExecutionContext, MemoryChannel, Reply, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (host_end, script_end) = MemoryChannel::pair();
//!
//!     // Host side: register commands, then attach
//!     let host = Bridge::builder().context(ExecutionContext::Host).build()?;
//!     host.commands().register_fn("echo", |payload| async move {
//!         Ok(Reply::Value(payload.unwrap_or_default()))
//!     })?;
//!     host.attach(Arc::new(host_end))?;
//!
//!     // Script side: attach and announce readiness
//!     let script = Bridge::builder().context(ExecutionContext::Script).build()?;
//!     script.attach(Arc::new(script_end))?;
//!     script.announce_ready()?;
//!
//!     let echoed = script.call("echo", Some(json!({"x": 1}))).await?;
//!     println!("echoed: {echoed}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`], [`BridgeBuilder`], [`PendingCall`] |
//! | [`command`] | [`Command`] trait and [`CommandRegistry`] |
//! | [`context`] | Execution contexts and [`ContextDispatcher`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`CorrelationId`] |
//! | [`protocol`] | Envelope codec and schema version gate |
//! | [`services`] | [`Services`] type map for commands |
//! | [`transport`] | Channels and the pending call registry |

// ============================================================================
// Modules
// ============================================================================

/// Bridge facade.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Commands and dispatch.
pub mod command;

/// Execution contexts.
///
/// Host work runs on a dedicated UI thread, script work on a serial queue.
pub mod context;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Correlation IDs.
pub mod identifiers;

/// Wire protocol.
///
/// Envelope types, encode/decode and the schema version gate.
pub mod protocol;

/// Shared services for command factories.
pub mod services;

/// Transport layer.
///
/// Channel contract, bundled channels and pending call bookkeeping.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, BridgeState, CommandFactory, PendingCall};

// Command types
pub use command::{Command, CommandDescriptor, CommandRegistry, InboundHandler, Reply};

// Context types
pub use context::{ContextDispatcher, ExecutionContext, Executor, SerialQueue, UiThread};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::CorrelationId;

// Protocol types
pub use protocol::{CURRENT_SCHEMA_VERSION, Envelope, EnvelopeKind, ErrorBody, ErrorCode};

// Service types
pub use services::Services;

// Transport types
pub use transport::{
    CancelToken, Channel, MemoryChannel, PendingCalls, WebSocketChannel, WebSocketListener,
};
