//! Handle to an outbound call.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::transport::CancelToken;

// ============================================================================
// PendingCall
// ============================================================================

/// Future resolving to the peer's answer.
///
/// Dropping it without awaiting does not cancel the call; the entry stays
/// pending until the response or the timeout removes it. Use
/// [`cancel`](Self::cancel) to abandon the call explicitly, after which the
/// future resolves to [`Error::Cancelled`].
#[must_use = "a call does nothing useful unless awaited or cancelled"]
pub struct PendingCall {
    token: CancelToken,
    rx: oneshot::Receiver<Result<Value>>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", self.token.id())
            .finish()
    }
}

impl PendingCall {
    pub(crate) fn new(token: CancelToken, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { token, rx }
    }

    /// Returns the call's correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        self.token.id()
    }

    /// Abandons the call. A late response is ignored.
    ///
    /// Returns `true` if the call was still pending.
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    /// Returns a token that can cancel the call from elsewhere.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The completion was dropped without running: cancelled.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
