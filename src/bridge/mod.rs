//! Bridge facade: lifecycle, outbound calls and the inbound pipeline.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | `BridgeBuilder` and command factories |
//! | `call` | `PendingCall` future |
//! | `core` | `Bridge` |
//! | `state` | `BridgeState` |

// ============================================================================
// Submodules
// ============================================================================

/// Bridge configuration.
pub mod builder;

/// Outbound call handle.
pub mod call;

/// Bridge implementation.
pub mod core;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{BridgeBuilder, CommandFactory};
pub use call::PendingCall;
pub use core::Bridge;
pub use state::BridgeState;
