//! Execution contexts.
//!
//! Inbound calls are dispatched onto the context local to the bridge that
//! received them: host handlers run on the host's UI thread, script handlers
//! run on the script's single-threaded queue.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dispatcher` | `ExecutionContext` and `ContextDispatcher` |
//! | `executor` | `Executor` trait, `UiThread`, `SerialQueue` |

// ============================================================================
// Submodules
// ============================================================================

/// Context routing.
pub mod dispatcher;

/// Executors.
pub mod executor;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{ContextDispatcher, ExecutionContext, HOST_THREAD_NAME, SCRIPT_QUEUE_NAME};
pub use executor::{Executor, Job, SerialQueue, UiThread};
