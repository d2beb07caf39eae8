//! Commands and dispatch.
//!
//! Concrete commands (device info, clipboard, storage, alerts, ...) live
//! outside this crate; they only implement [`Command`] or are written as
//! closures and registered by action name.
//!
//! # Example
//!
//! ```ignore
//! use webview_bridge::command::{CommandRegistry, Reply};
//!
//! let registry = CommandRegistry::new();
//! registry.register_fn("echo", |payload| async move {
//!     Ok(Reply::Value(payload.unwrap_or_default()))
//! })?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Command trait, replies and closure adapters.
pub mod handler;

/// Action-to-handler table.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{Command, CommandDescriptor, Reply};
pub use registry::{CommandRegistry, InboundHandler};

pub(crate) use registry::catch_panic;
