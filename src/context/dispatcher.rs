//! Routing work to an execution context.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{Error, Result};

use super::executor::{Executor, SerialQueue, UiThread};

// ============================================================================
// Constants
// ============================================================================

/// Thread name used by [`ContextDispatcher::spawn_default`] for the host side.
pub const HOST_THREAD_NAME: &str = "bridge-host-ui";

/// Queue name used by [`ContextDispatcher::spawn_default`] for the script side.
pub const SCRIPT_QUEUE_NAME: &str = "bridge-script";

// ============================================================================
// ExecutionContext
// ============================================================================

/// Which side of the bridge a piece of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// The host's UI-owning thread.
    Host,
    /// The embedded script context.
    Script,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Script => f.write_str("script"),
        }
    }
}

// ============================================================================
// ContextDispatcher
// ============================================================================

/// Posts work to the host or script context.
#[derive(Clone)]
pub struct ContextDispatcher {
    host: Arc<dyn Executor>,
    script: Arc<dyn Executor>,
}

impl fmt::Debug for ContextDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDispatcher").finish_non_exhaustive()
    }
}

impl ContextDispatcher {
    /// Creates a dispatcher over platform-provided executors.
    #[must_use]
    pub fn new(host: Arc<dyn Executor>, script: Arc<dyn Executor>) -> Self {
        Self { host, script }
    }

    /// Creates a dispatcher with a dedicated [`UiThread`] for the host and a
    /// [`SerialQueue`] for the script side.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the host thread cannot be started.
    pub fn spawn_default() -> Result<Self> {
        let host = UiThread::spawn(HOST_THREAD_NAME)?;
        let script = SerialQueue::spawn(SCRIPT_QUEUE_NAME);
        Ok(Self::new(Arc::new(host), Arc::new(script)))
    }

    /// Posts work to the host's UI thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the host context has stopped.
    pub fn run_on_host_context<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.host.execute(Box::pin(work))
    }

    /// Posts work to the script context.
    ///
    /// # Errors
    ///
    /// Returns an error if the script context has stopped.
    pub fn run_on_script_context<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.script.execute(Box::pin(work))
    }

    /// Posts work to `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the context has stopped.
    pub fn run_on<F>(&self, context: ExecutionContext, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match context {
            ExecutionContext::Host => self.run_on_host_context(work),
            ExecutionContext::Script => self.run_on_script_context(work),
        }
    }

    /// Runs `work` on `context` and returns its output to the caller.
    ///
    /// Lets a command that was dispatched on one side touch state owned by
    /// the other.
    ///
    /// # Errors
    ///
    /// Returns an error if the context has stopped or dropped the work.
    pub async fn hop<T, F>(&self, context: ExecutionContext, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run_on(context, async move {
            let _ = tx.send(work.await);
        })?;

        rx.await
            .map_err(|_| Error::internal(format!("{context} context dropped the work")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::context::Job;

    #[test]
    fn test_context_display() {
        assert_eq!(ExecutionContext::Host.to_string(), "host");
        assert_eq!(ExecutionContext::Script.to_string(), "script");
    }

    #[tokio::test]
    async fn test_host_work_runs_on_ui_thread() {
        let dispatcher = ContextDispatcher::spawn_default().expect("dispatcher");

        let name = dispatcher
            .hop(ExecutionContext::Host, async {
                std::thread::current().name().map(str::to_string)
            })
            .await
            .expect("hop");
        assert_eq!(name.as_deref(), Some(HOST_THREAD_NAME));
    }

    #[tokio::test]
    async fn test_script_work_runs() {
        let dispatcher = ContextDispatcher::spawn_default().expect("dispatcher");

        let value = dispatcher
            .hop(ExecutionContext::Script, async { 40 + 2 })
            .await
            .expect("hop");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_stopped_context_reports_error() {
        struct Stopped;

        impl Executor for Stopped {
            fn execute(&self, _job: Job) -> Result<()> {
                Err(Error::internal("stopped"))
            }
        }

        let dispatcher = ContextDispatcher::new(Arc::new(Stopped), Arc::new(Stopped));
        assert!(dispatcher.run_on_host_context(async {}).is_err());

        let err = dispatcher
            .hop(ExecutionContext::Script, async {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }
}
