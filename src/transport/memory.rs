//! In-process channel.
//!
//! Connects two bridges living in the same process, e.g. a host bridge and a
//! script-side bridge in tests or demos. Each direction is an unbounded
//! queue drained by a Tokio task, so inbound callbacks run on a runtime
//! worker thread just like a platform delivery thread would.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

use super::channel::{Channel, CloseCallback, Inbox, ReceiveCallback};

// ============================================================================
// MemoryChannel
// ============================================================================

/// One end of an in-process channel pair.
///
/// Dropping or closing one end closes the other.
pub struct MemoryChannel {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbox: Arc<Inbox>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryChannel {
    /// Creates a connected pair.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            outbound: Mutex::new(Some(a_tx)),
            inbox: Arc::new(Inbox::default()),
        };
        let b = Self {
            outbound: Mutex::new(Some(b_tx)),
            inbox: Arc::new(Inbox::default()),
        };

        Self::spawn_delivery(a_rx, Arc::clone(&b.inbox));
        Self::spawn_delivery(b_rx, Arc::clone(&a.inbox));

        (a, b)
    }

    /// Closes this end; the peer observes the close once drained.
    pub fn close(&self) {
        if self.outbound.lock().take().is_some() {
            debug!("Memory channel closed");
        }
        self.inbox.close();
    }

    /// Returns `true` once this end is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    fn spawn_delivery(mut rx: mpsc::UnboundedReceiver<String>, inbox: Arc<Inbox>) {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                inbox.deliver(message);
            }
            inbox.close();
        });
    }
}

impl Channel for MemoryChannel {
    fn send(&self, message: String) -> Result<()> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).map_err(|_| Error::ChannelClosed),
            None => Err(Error::ChannelClosed),
        }
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        self.inbox.set_on_message(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        self.inbox.set_on_close(callback);
    }
}

// ============================================================================
// Tests
// ============================================================================
