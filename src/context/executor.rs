//! Executors for the two execution contexts.
//!
//! - [`SerialQueue`]: one job at a time, each run to completion before the
//!   next starts. Models the single-threaded cooperative script context.
//! - [`UiThread`]: a dedicated, named OS thread that owns all work posted to
//!   it. Jobs interleave at `.await` points but never leave the thread.
//!   Models the host's UI-owning thread.
//!
//! Platforms with their own main-thread poster implement [`Executor`]
//! directly.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::thread::ThreadId;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Unit of work posted to an execution context.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs jobs on one execution context.
pub trait Executor: Send + Sync {
    /// Queues a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the context has stopped.
    fn execute(&self, job: Job) -> Result<()>;
}

fn stopped(name: &str) -> Error {
    Error::internal(format!("execution context `{name}` has stopped"))
}

// ============================================================================
// SerialQueue
// ============================================================================

/// Run-to-completion job queue on the current Tokio runtime.
pub struct SerialQueue {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .finish()
    }
}

impl SerialQueue {
    /// Starts the queue's worker task.
    ///
    /// Must be called from within a Tokio runtime. The worker stops when the
    /// queue is dropped.
    #[must_use]
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker = name.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    warn!(context = %worker, "Job panicked");
                }
            }
            debug!(context = %worker, "Serial queue stopped");
        });

        Self { name, tx }
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| stopped(&self.name))
    }
}

// ============================================================================
// UiThread
// ============================================================================

/// Dedicated thread owning every job posted to it.
pub struct UiThread {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

impl fmt::Debug for UiThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiThread")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl UiThread {
    /// Starts the thread.
    ///
    /// The thread exits when the handle is dropped; jobs still suspended at
    /// that point are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the runtime or the thread cannot be created.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let worker = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(job) = rx.recv().await {
                        tokio::task::spawn_local(job);
                    }
                });
                debug!(context = %worker, "UI thread stopped");
            })?;

        Ok(Self {
            name,
            tx,
            thread_id: handle.thread().id(),
        })
    }

    /// Returns the thread's ID.
    #[inline]
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns `true` when called from the UI thread.
    #[inline]
    #[must_use]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}

impl Executor for UiThread {
    fn execute(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| stopped(&self.name))
    }
}

// ============================================================================
// Tests
// ============================================================================
