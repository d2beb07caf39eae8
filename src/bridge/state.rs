//! Bridge lifecycle.

use std::fmt;

/// Lifecycle state of a bridge.
///
/// ```text
/// Uninitialized ──attach──► Attached ──ready signal──► Ready
///        │                     │                         │
///        └─────────────────────┴────── tear_down ────────┴──► TornDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BridgeState {
    /// No channel yet. Calls are queued.
    #[default]
    Uninitialized,
    /// Channel wired up, peer not ready. Calls are queued.
    Attached,
    /// Peer ready. Calls go straight to the channel.
    Ready,
    /// Channel gone. Every operation fails with [`crate::Error::TornDown`].
    TornDown,
}

impl BridgeState {
    /// Returns `true` while outbound calls are held back.
    #[inline]
    #[must_use]
    pub const fn queues_calls(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Attached)
    }

    /// Returns `true` once torn down.
    #[inline]
    #[must_use]
    pub const fn is_torn_down(self) -> bool {
        matches!(self, Self::TornDown)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Attached => "attached",
            Self::Ready => "ready",
            Self::TornDown => "torn down",
        };
        f.write_str(name)
    }
}
