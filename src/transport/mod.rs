//! Transport layer.
//!
//! This module holds the channel contract the bridge consumes from the host
//! platform, the bundled channel implementations, and the registry of calls
//! awaiting a response.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Host (Rust)    │                              │  Script context │
//! │                 │          Channel             │  (web content)  │
//! │  Bridge         │◄────────────────────────────►│                 │
//! │  PendingCalls   │   send(wire) / onReceive     │  Bridge (JS or  │
//! │                 │                              │  Rust peer)     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | `Channel` trait and inbound buffering |
//! | `memory` | In-process channel pair |
//! | `pending` | Pending call registry with timeouts |
//! | `websocket` | WebSocket channel and listener |

// ============================================================================
// Submodules
// ============================================================================

/// Channel contract.
pub mod channel;

/// In-process channel pair.
pub mod memory;

/// Pending call registry.
pub mod pending;

/// WebSocket channel.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, CloseCallback, ReceiveCallback};
pub use memory::MemoryChannel;
pub use pending::{CancelToken, Completion, DEFAULT_CALL_TIMEOUT, PendingCalls};
pub use websocket::{WebSocketChannel, WebSocketListener};
