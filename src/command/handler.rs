//! Command contract.
//!
//! A command handles one action. Handlers are async, may fail with any
//! [`Error`], and may answer [`Reply::NoReply`] to suppress the response
//! envelope entirely.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Reply
// ============================================================================

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Send a success response carrying this value (`null` included).
    Value(Value),
    /// Send nothing, even if the call carried a correlation ID.
    NoReply,
}

impl Reply {
    /// A success response with a `null` result.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// Serializes `value` into a success reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    /// Returns `true` for [`Reply::NoReply`].
    #[inline]
    #[must_use]
    pub const fn is_no_reply(&self) -> bool {
        matches!(self, Self::NoReply)
    }
}

impl From<Value> for Reply {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

// ============================================================================
// Command
// ============================================================================

/// Handler for one action.
#[async_trait]
pub trait Command: Send + Sync {
    /// Runs the command with the call's payload.
    async fn execute(&self, payload: Option<Value>) -> Result<Reply>;
}

/// Adapts an async closure into a [`Command`].
pub struct FnCommand<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Command for FnCommand<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    async fn execute(&self, payload: Option<Value>) -> Result<Reply> {
        (self.f)(payload).await
    }
}

/// Adapts a typed async closure into a [`Command`].
///
/// The payload is deserialized into `P` (absent payload reads as `null`);
/// failure is reported as [`Error::InvalidParameter`]. The result is
/// serialized from `R`.
pub struct TypedCommand<P, R, F> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<P, R, F, Fut> Command for TypedCommand<P, R, F>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    async fn execute(&self, payload: Option<Value>) -> Result<Reply> {
        let params: P = serde_json::from_value(payload.unwrap_or(Value::Null))
            .map_err(|e| Error::invalid_parameter(e.to_string()))?;
        let result = (self.f)(params).await?;
        Reply::json(&result)
    }
}

// ============================================================================
// CommandDescriptor
// ============================================================================

/// An action name bound to its handler.
#[derive(Clone)]
pub struct CommandDescriptor {
    action: String,
    handler: Arc<dyn Command>,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl CommandDescriptor {
    /// Binds `action` to a [`Command`] implementation.
    #[must_use]
    pub fn new(action: impl Into<String>, handler: impl Command + 'static) -> Self {
        Self {
            action: action.into(),
            handler: Arc::new(handler),
        }
    }

    /// Binds `action` to an async closure over the raw payload.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let echo = CommandDescriptor::from_fn("echo", |payload| async move {
    ///     Ok(Reply::Value(payload.unwrap_or_default()))
    /// });
    /// ```
    #[must_use]
    pub fn from_fn<F, Fut>(action: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        Self::new(action, FnCommand { f })
    }

    /// Binds `action` to an async closure over a typed payload.
    #[must_use]
    pub fn typed<P, R, F, Fut>(action: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self::new(
            action,
            TypedCommand {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Returns the action name.
    #[inline]
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the handler.
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Command> {
        &self.handler
    }
}

// ============================================================================
// Tests
// ============================================================================
