//! Host channel contract.
//!
//! The bridge only needs a bidirectional string channel: `send` to the peer
//! and a callback for inbound text. How the script context gets loaded and
//! wired to the channel is the platform's business.
//!
//! Inbound callbacks may run on any thread. Writes are assumed to be
//! serialized by the channel itself.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// Callback for inbound wire strings.
pub type ReceiveCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback invoked once when the channel closes.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

// ============================================================================
// Channel
// ============================================================================

/// Bidirectional string channel to the peer.
pub trait Channel: Send + Sync {
    /// Sends one wire string to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the write fails.
    fn send(&self, message: String) -> Result<()>;

    /// Installs the inbound callback, replacing any previous one.
    ///
    /// Messages received before a callback is installed are buffered and
    /// replayed to it.
    fn on_receive(&self, callback: ReceiveCallback);

    /// Installs the close callback.
    ///
    /// Channels that never close may ignore it.
    fn on_close(&self, callback: CloseCallback) {
        drop(callback);
    }
}

// ============================================================================
// Inbox
// ============================================================================

/// Inbound side shared by the bundled channels.
///
/// Buffers messages until a receive callback exists and fires the close
/// callback exactly once.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
}

#[derive(Default)]
struct InboxState {
    on_message: Option<ReceiveCallback>,
    on_close: Option<CloseCallback>,
    backlog: Vec<String>,
    closed: bool,
}

impl Inbox {
    /// Delivers one inbound message.
    pub(crate) fn deliver(&self, message: String) {
        let callback = {
            let mut state = self.state.lock();
            if state.closed {
                trace!("Dropping message for closed inbox");
                return;
            }
            match state.on_message.clone() {
                Some(callback) => callback,
                None => {
                    state.backlog.push(message);
                    return;
                }
            }
        };

        callback(message);
    }

    /// Installs the receive callback and replays the backlog into it.
    pub(crate) fn set_on_message(&self, callback: ReceiveCallback) {
        let backlog = {
            let mut state = self.state.lock();
            state.on_message = Some(Arc::clone(&callback));
            std::mem::take(&mut state.backlog)
        };

        for message in backlog {
            callback(message);
        }
    }

    /// Installs the close callback; fires immediately if already closed.
    pub(crate) fn set_on_close(&self, callback: CloseCallback) {
        {
            let mut state = self.state.lock();
            if !state.closed {
                state.on_close = Some(callback);
                return;
            }
        }
        callback();
    }

    /// Marks the inbox closed and fires the close callback.
    pub(crate) fn close(&self) {
        let callback = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.backlog.clear();
            state.on_message = None;
            state.on_close.take()
        };

        if let Some(callback) = callback {
            callback();
        }
    }

    /// Returns `true` once closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ============================================================================
// Tests
// ============================================================================
