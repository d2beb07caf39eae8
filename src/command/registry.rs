//! Command dispatch registry.
//!
//! Maps action names to handlers. The table is small and mostly static, so
//! it is an ordered `Vec` scanned linearly under a read lock.
//!
//! Dispatch never propagates a handler failure: errors and panics come back
//! as [`Error::InvalidParameter`] or [`Error::Internal`], and an unregistered
//! action as [`Error::UnknownAction`].

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::handler::{Command, CommandDescriptor, Reply};

// ============================================================================
// InboundHandler
// ============================================================================

/// Receives every inbound call.
///
/// The bridge holds exactly one; [`CommandRegistry`] is the usual one.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handles one inbound call.
    async fn handle(&self, action: &str, payload: Option<Value>) -> Result<Reply>;
}

// ============================================================================
// CommandRegistry
// ============================================================================

/// Ordered table of commands, unique by action.
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<Vec<CommandDescriptor>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAction`] if the action is already registered.
    pub fn register(&self, descriptor: CommandDescriptor) -> Result<()> {
        let mut commands = self.commands.write();
        if commands.iter().any(|c| c.action() == descriptor.action()) {
            return Err(Error::duplicate_action(descriptor.action()));
        }

        debug!(action = descriptor.action(), "Command registered");
        commands.push(descriptor);
        Ok(())
    }

    /// Adds an async closure over the raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAction`] if the action is already registered.
    pub fn register_fn<F, Fut>(&self, action: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        self.register(CommandDescriptor::from_fn(action, f))
    }

    /// Adds an async closure over a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAction`] if the action is already registered.
    pub fn register_typed<P, R, F, Fut>(&self, action: impl Into<String>, f: F) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.register(CommandDescriptor::typed(action, f))
    }

    /// Removes a command. Returns `true` if it was registered.
    pub fn unregister(&self, action: &str) -> bool {
        let mut commands = self.commands.write();
        let before = commands.len();
        commands.retain(|c| c.action() != action);
        before != commands.len()
    }

    /// Returns `true` if `action` is registered.
    #[must_use]
    pub fn contains(&self, action: &str) -> bool {
        self.lookup(action).is_some()
    }

    /// Returns registered actions in registration order.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.commands
            .read()
            .iter()
            .map(|c| c.action().to_string())
            .collect()
    }

    /// Returns the number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    /// Returns `true` if no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }

    /// Runs the command registered for `action`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownAction`] if nothing is registered for `action`
    /// - [`Error::InvalidParameter`] if the handler rejected the payload
    /// - [`Error::Internal`] for any other handler error or a panic
    pub async fn dispatch(&self, action: &str, payload: Option<Value>) -> Result<Reply> {
        let handler = self
            .lookup(action)
            .ok_or_else(|| Error::unknown_action(action))?;

        match catch_panic(handler.execute(payload)).await {
            Ok(reply) => Ok(reply),
            Err(err @ (Error::InvalidParameter { .. } | Error::Internal { .. })) => {
                debug!(action, error = %err, "Command failed");
                Err(err)
            }
            Err(other) => {
                debug!(action, error = %other, "Command failed");
                Err(Error::internal(other.to_string()))
            }
        }
    }

    /// Clones the handler out so the lock is not held while it runs.
    fn lookup(&self, action: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .read()
            .iter()
            .find(|c| c.action() == action)
            .map(|c| Arc::clone(c.handler()))
    }
}

#[async_trait]
impl InboundHandler for CommandRegistry {
    async fn handle(&self, action: &str, payload: Option<Value>) -> Result<Reply> {
        self.dispatch(action, payload).await
    }
}

// ============================================================================
// Panic Guard
// ============================================================================

/// Awaits a handler future, turning a panic into [`Error::Internal`].
pub(crate) async fn catch_panic<F>(future: F) -> Result<Reply>
where
    F: Future<Output = Result<Reply>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(%message, "Handler panicked");
            Err(Error::internal(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
