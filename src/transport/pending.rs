//! Pending call registry.
//!
//! Tracks calls awaiting a response. Each entry owns a completion callback
//! and an armed expiry timer. An entry leaves the map exactly once, through
//! one of:
//!
//! - [`PendingCalls::resolve`] / [`PendingCalls::reject`] (response arrived)
//! - the expiry timer (completes with [`Error::Timeout`])
//! - [`CancelToken::cancel`] (removed without completing)
//! - [`PendingCalls::drain_all`] (teardown)
//!
//! Every path removes the entry under the lock first and only then touches
//! the callback, outside the lock. Whichever path removes the entry owns the
//! completion; the others find nothing and return `false`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for calls (30s).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Exactly-once completion callback.
pub type Completion = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

/// A registered call.
struct PendingEntry {
    complete: Completion,
    expiry: AbortHandle,
}

/// Map of correlation IDs to pending entries.
type PendingMap = FxHashMap<CorrelationId, PendingEntry>;

struct Shared {
    entries: Mutex<PendingMap>,
}

impl Shared {
    /// Removes an entry, stopping its timer. The single removal primitive.
    fn take(&self, id: &CorrelationId) -> Option<Completion> {
        let entry = self.entries.lock().remove(id)?;
        entry.expiry.abort();
        Some(entry.complete)
    }

    /// Timer path.
    fn expire(&self, id: &CorrelationId, timeout: Duration) {
        if let Some(complete) = self.take(id) {
            debug!(%id, timeout_ms = timeout.as_millis() as u64, "Call timed out");
            complete(Err(Error::timeout(id.clone(), timeout.as_millis() as u64)));
        }
    }
}

// ============================================================================
// PendingCalls
// ============================================================================

/// Thread-safe registry of in-flight calls.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Runtime
///
/// Timers run on the runtime captured at construction, so
/// [`register`](Self::register) works from any thread, including threads
/// that never entered a Tokio runtime.
#[derive(Clone)]
pub struct PendingCalls {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCalls")
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingCalls {
    /// Creates an empty registry whose timers run on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(PendingMap::default()),
            }),
            runtime,
        }
    }

    /// Creates an empty registry on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a Tokio runtime.
    pub fn try_current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("no Tokio runtime for call timers: {e}")))?;
        Ok(Self::new(runtime))
    }

    /// Registers a call and arms its expiry timer.
    ///
    /// When the timer fires first, `on_complete` receives
    /// [`Error::Timeout`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `timeout` is zero
    /// - [`Error::Config`] if `id` is already pending
    pub fn register<F>(
        &self,
        id: CorrelationId,
        on_complete: F,
        timeout: Duration,
    ) -> Result<CancelToken>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        if timeout.is_zero() {
            return Err(Error::config("call timeout must be non-zero"));
        }

        let mut entries = self.shared.entries.lock();
        if entries.contains_key(&id) {
            return Err(Error::config(format!(
                "correlation ID {id} is already pending"
            )));
        }

        // The timer cannot observe the map before the insert below: it needs
        // the lock we are holding.
        let weak = Arc::downgrade(&self.shared);
        let timer_id = id.clone();
        let expiry = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(&timer_id, timeout);
            }
        })
        .abort_handle();

        entries.insert(
            id.clone(),
            PendingEntry {
                complete: Box::new(on_complete),
                expiry,
            },
        );
        trace!(%id, pending = entries.len(), "Call registered");

        Ok(CancelToken {
            id,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Completes a call successfully.
    ///
    /// Returns `false` for unknown IDs (late or duplicate responses).
    pub fn resolve(&self, id: &CorrelationId, result: Value) -> bool {
        match self.shared.take(id) {
            Some(complete) => {
                complete(Ok(result));
                true
            }
            None => {
                debug!(%id, "Response for unknown call");
                false
            }
        }
    }

    /// Completes a call with a failure.
    ///
    /// Returns `false` for unknown IDs (late or duplicate responses).
    pub fn reject(&self, id: &CorrelationId, error: Error) -> bool {
        match self.shared.take(id) {
            Some(complete) => {
                complete(Err(error));
                true
            }
            None => {
                debug!(%id, %error, "Failure for unknown call");
                false
            }
        }
    }

    /// Removes a call without completing it.
    ///
    /// Returns `true` if the call was still pending.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let cancelled = self.shared.take(id).is_some();
        if cancelled {
            debug!(%id, "Call cancelled");
        }
        cancelled
    }

    /// Completes every pending call with `reason` and empties the registry.
    ///
    /// Returns the number of calls drained.
    pub fn drain_all<F>(&self, reason: F) -> usize
    where
        F: Fn(&CorrelationId) -> Error,
    {
        let drained: Vec<_> = self.shared.entries.lock().drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            entry.expiry.abort();
            (entry.complete)(Err(reason(&id)));
        }

        if count > 0 {
            debug!(count, "Drained pending calls");
        }
        count
    }

    /// Returns `true` if `id` is still pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.shared.entries.lock().contains_key(id)
    }

    /// Returns the number of pending calls.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// CancelToken
// ============================================================================

/// Abandons a pending call.
///
/// Holds a non-owning handle to the registry; cancelling after the registry
/// is gone is a no-op.
#[derive(Debug, Clone)]
pub struct CancelToken {
    id: CorrelationId,
    shared: Weak<Shared>,
}

impl CancelToken {
    /// Returns the call's correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Removes the call without invoking its completion.
    ///
    /// Returns `true` if the call was still pending. A response arriving
    /// afterwards finds no entry and is ignored.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let cancelled = shared.take(&self.id).is_some();
        if cancelled {
            debug!(id = %self.id, "Call cancelled");
        }
        cancelled
    }
}

// ============================================================================
// Tests
// ============================================================================
