//! Builder pattern for bridge configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use webview_bridge::{Bridge, CommandDescriptor, ExecutionContext, Reply};
//!
//! # struct KeyStore;
//! # async fn example() -> webview_bridge::Result<()> {
//! let bridge = Bridge::builder()
//!     .context(ExecutionContext::Host)
//!     .default_timeout(Duration::from_secs(10))
//!     .service(Arc::new(KeyStore))
//!     .command_factory(|services| {
//!         let keys = services.require::<KeyStore>()?;
//!         Ok(vec![CommandDescriptor::from_fn("storage.get", move |_| {
//!             let _keys = Arc::clone(&keys);
//!             async move { Ok(Reply::null()) }
//!         })])
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandDescriptor, CommandRegistry};
use crate::context::{ContextDispatcher, ExecutionContext};
use crate::error::{Error, Result};
use crate::protocol::CURRENT_SCHEMA_VERSION;
use crate::services::Services;
use crate::transport::{DEFAULT_CALL_TIMEOUT, PendingCalls};

use super::core::{Bridge, BridgeConfig};

// ============================================================================
// Types
// ============================================================================

/// Produces commands from the bridge's services at build time.
pub type CommandFactory =
    Box<dyn FnOnce(&Services) -> Result<Vec<CommandDescriptor>> + Send + 'static>;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`].
///
/// Use [`Bridge::builder()`] to create a new builder.
pub struct BridgeBuilder {
    /// Local protocol version.
    schema_version: u32,
    /// Timeout for calls without an explicit one.
    default_timeout: Duration,
    /// Side this bridge runs on.
    context: ExecutionContext,
    /// Executors; a default pair is spawned when unset.
    dispatcher: Option<ContextDispatcher>,
    /// Command table; a fresh one when unset.
    registry: Option<Arc<CommandRegistry>>,
    /// Shared services for command factories.
    services: Services,
    /// Deferred command construction.
    factories: Vec<CommandFactory>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            default_timeout: DEFAULT_CALL_TIMEOUT,
            context: ExecutionContext::Host,
            dispatcher: None,
            registry: None,
            services: Services::new(),
            factories: Vec::new(),
        }
    }
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("schema_version", &self.schema_version)
            .field("default_timeout", &self.default_timeout)
            .field("context", &self.context)
            .field("services", &self.services)
            .field("factories", &self.factories.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local schema version (default [`CURRENT_SCHEMA_VERSION`]).
    ///
    /// Inbound envelopes with a higher version are dropped.
    #[inline]
    #[must_use]
    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the timeout for calls issued without one (default 30s).
    #[inline]
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets which side this bridge runs on (default host).
    ///
    /// Inbound calls are dispatched on this context.
    #[inline]
    #[must_use]
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Uses platform executors instead of the default pair.
    #[inline]
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: ContextDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Uses an existing command registry as the inbound handler.
    #[inline]
    #[must_use]
    pub fn registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds a shared service, replacing any of the same type.
    #[inline]
    #[must_use]
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert_arc(service);
        self
    }

    /// Adds a factory run at build time with the collected services.
    #[inline]
    #[must_use]
    pub fn command_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&Services) -> Result<Vec<CommandDescriptor>> + Send + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    /// Builds the bridge with validation.
    ///
    /// Must be called from within a Tokio runtime. Call timers run on that
    /// runtime, so the built bridge can issue calls from any thread.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the schema version or default timeout is zero
    /// - [`Error::Config`] if called outside a Tokio runtime
    /// - [`Error::Config`] if a factory needs a missing service
    /// - [`Error::DuplicateAction`] if two commands share an action
    /// - [`Error::Io`] if the default host thread cannot be started
    pub fn build(self) -> Result<Bridge> {
        self.validate()?;
        let pending = PendingCalls::try_current()?;

        let registry = self.registry.unwrap_or_default();
        for factory in self.factories {
            for descriptor in factory(&self.services)? {
                registry.register(descriptor)?;
            }
        }

        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => ContextDispatcher::spawn_default()?,
        };

        Ok(Bridge::new(BridgeConfig {
            context: self.context,
            schema_version: self.schema_version,
            default_timeout: self.default_timeout,
            dispatcher,
            registry,
            services: self.services,
            pending,
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    fn validate(&self) -> Result<()> {
        if self.schema_version == 0 {
            return Err(Error::config(
                "Schema version must be at least 1. Use .schema_version() to set it.",
            ));
        }

        if self.default_timeout.is_zero() {
            return Err(Error::config(
                "Default timeout must be non-zero. Every call needs a finite timeout.",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::command::Reply;

    struct Clock(u64);

    #[test]
    fn test_defaults() {
        let builder = BridgeBuilder::new();
        assert_eq!(builder.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(builder.default_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(builder.context, ExecutionContext::Host);
        assert!(builder.dispatcher.is_none());
        assert!(builder.factories.is_empty());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = BridgeBuilder::new()
            .default_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_zero_schema_version_rejected() {
        let err = BridgeBuilder::new().schema_version(0).build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_outside_runtime_rejected() {
        let err = BridgeBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_factory_receives_services() {
        let bridge = BridgeBuilder::new()
            .service(Arc::new(Clock(42)))
            .command_factory(|services| {
                let clock = services.require::<Clock>()?;
                Ok(vec![CommandDescriptor::from_fn("clock.now", move |_| {
                    let now = clock.0;
                    async move { Ok(Reply::Value(now.into())) }
                })])
            })
            .build()
            .expect("build");

        assert!(bridge.commands().contains("clock.now"));
        assert!(bridge.services().contains::<Clock>());
    }

    #[tokio::test]
    async fn test_factory_missing_service_fails() {
        let err = BridgeBuilder::new()
            .command_factory(|services| {
                services.require::<Clock>()?;
                Ok(Vec::new())
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_factory_actions_fail() {
        let ping = || CommandDescriptor::from_fn("ping", |_| async { Ok(Reply::null()) });
        let err = BridgeBuilder::new()
            .command_factory(move |_| Ok(vec![ping(), ping()]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAction { .. }));
    }
}
