//! Bridge facade.
//!
//! One [`Bridge`] per side of a channel. Both sides are the same type: the
//! host bridge runs inbound calls on the host UI thread, the script bridge
//! on the script queue.
//!
//! # Inbound pipeline
//!
//! 1. Decode; unparseable text is answered with `PARSE_ERROR` when a
//!    correlation ID can be salvaged, otherwise dropped
//! 2. Drop envelopes whose `schemaVersion` is newer than ours
//! 3. Responses complete the matching pending call
//! 4. The ready signal moves the bridge to [`BridgeState::Ready`]
//! 5. Calls run on the local execution context; a response is sent only
//!    when the call carried a correlation ID
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use webview_bridge::{Bridge, ExecutionContext, MemoryChannel};
//!
//! # async fn example() -> webview_bridge::Result<()> {
//! let (host_end, script_end) = MemoryChannel::pair();
//!
//! let host = Bridge::builder().build()?;
//! host.commands()
//!     .register_fn("echo", |payload| async move { Ok(payload.unwrap_or_default().into()) })?;
//! host.attach(Arc::new(host_end))?;
//!
//! let script = Bridge::builder().context(ExecutionContext::Script).build()?;
//! script.attach(Arc::new(script_end))?;
//! script.announce_ready()?;
//!
//! let echoed = script.call("echo", Some(json!({"x": 1}))).await?;
//! assert_eq!(echoed, json!({"x": 1}));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::command::{CommandRegistry, InboundHandler, Reply, catch_panic};
use crate::context::{ContextDispatcher, ExecutionContext};
use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{
    Envelope, EnvelopeKind, ErrorBody, ErrorCode, ParseError, VersionGate, decode, encode,
};
use crate::services::Services;
use crate::transport::{Channel, PendingCalls};

use super::builder::BridgeBuilder;
use super::call::PendingCall;
use super::state::BridgeState;

// ============================================================================
// Types
// ============================================================================

/// Settings resolved by [`BridgeBuilder`].
pub(crate) struct BridgeConfig {
    pub(crate) context: ExecutionContext,
    pub(crate) schema_version: u32,
    pub(crate) default_timeout: Duration,
    pub(crate) dispatcher: ContextDispatcher,
    pub(crate) registry: Arc<CommandRegistry>,
    pub(crate) services: Services,
    pub(crate) pending: PendingCalls,
}

/// An encoded call or event waiting for the peer to become ready.
struct Queued {
    wire: String,
    correlation_id: Option<CorrelationId>,
}

/// State guarded together so sends and transitions stay ordered.
#[derive(Default)]
struct Link {
    state: BridgeState,
    channel: Option<Arc<dyn Channel>>,
    outbox: VecDeque<Queued>,
}

/// Shared bridge internals.
pub(crate) struct BridgeInner {
    context: ExecutionContext,
    gate: VersionGate,
    default_timeout: Duration,
    dispatcher: ContextDispatcher,
    registry: Arc<CommandRegistry>,
    services: Services,
    pending: PendingCalls,
    handler: RwLock<Arc<dyn InboundHandler>>,
    link: Mutex<Link>,
}

// ============================================================================
// Bridge
// ============================================================================

/// One side of the message bridge.
///
/// Cheap to clone; clones share the same pending calls, handler and
/// channel. Dropping the last clone tears the bridge down.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("context", &self.inner.context)
            .field("state", &self.state())
            .field("schema_version", &self.schema_version())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// Bridge - Constructor
// ============================================================================

impl Bridge {
    /// Creates a new bridge builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    pub(crate) fn new(config: BridgeConfig) -> Self {
        let handler: Arc<dyn InboundHandler> = config.registry.clone();
        Self {
            inner: Arc::new(BridgeInner {
                context: config.context,
                gate: VersionGate::new(config.schema_version),
                default_timeout: config.default_timeout,
                dispatcher: config.dispatcher,
                registry: config.registry,
                services: config.services,
                pending: config.pending,
                handler: RwLock::new(handler),
                link: Mutex::new(Link::default()),
            }),
        }
    }
}

// ============================================================================
// Bridge - Accessors
// ============================================================================

impl Bridge {
    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.inner.state()
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns the local schema version.
    #[inline]
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.inner.gate.local()
    }

    /// Returns the timeout used by [`call`](Self::call).
    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Returns the side this bridge runs on.
    #[inline]
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.inner.context
    }

    /// Returns the shared services.
    #[inline]
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Returns the executors, for commands that need to hop contexts.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &ContextDispatcher {
        &self.inner.dispatcher
    }

    /// Returns the command registry created by the builder.
    ///
    /// It handles inbound calls until [`on`](Self::on) installs another
    /// handler.
    #[inline]
    #[must_use]
    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.inner.registry
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Wires the bridge to its channel.
    ///
    /// The channel's callbacks hold a non-owning handle to the bridge; a
    /// closing channel tears the bridge down.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if already attached
    /// - [`Error::TornDown`] after teardown
    pub fn attach(&self, channel: Arc<dyn Channel>) -> Result<()> {
        {
            let mut link = self.inner.link.lock();
            match link.state {
                BridgeState::Uninitialized => {}
                BridgeState::TornDown => return Err(Error::TornDown),
                state => {
                    return Err(Error::config(format!("bridge already attached ({state})")));
                }
            }
            link.channel = Some(Arc::clone(&channel));
            link.state = BridgeState::Attached;
        }
        info!(context = %self.inner.context, "Bridge attached");

        let weak = Arc::downgrade(&self.inner);
        channel.on_receive(Arc::new(move |wire: String| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(&wire);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        channel.on_close(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                debug!(context = %inner.context, "Channel closed");
                inner.tear_down();
            }
        }));

        Ok(())
    }

    /// Tells the peer this side is initialized and marks the bridge ready.
    ///
    /// Queued calls are flushed after the signal. Calling it again once
    /// ready is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if not attached
    /// - [`Error::TornDown`] after teardown
    /// - any error from the channel's `send`
    pub fn announce_ready(&self) -> Result<()> {
        let wire = encode(&Envelope::ready(self.schema_version()))?;
        {
            let link = self.inner.link.lock();
            match link.state {
                BridgeState::Attached => {}
                BridgeState::Ready => return Ok(()),
                BridgeState::TornDown => return Err(Error::TornDown),
                BridgeState::Uninitialized => {
                    return Err(Error::config("cannot announce readiness before attach"));
                }
            }
            if let Some(channel) = &link.channel {
                channel.send(wire)?;
            }
        }

        self.inner.mark_ready();
        Ok(())
    }

    /// Tears the bridge down.
    ///
    /// Fails every pending call with [`Error::TornDown`], discards queued
    /// envelopes and detaches the channel. Idempotent.
    pub fn tear_down(&self) {
        self.inner.tear_down();
    }

    /// Feeds one inbound wire string into the bridge.
    ///
    /// Attached channels call this from their receive callback; platforms
    /// that push messages by hand can call it directly.
    pub fn receive(&self, wire: &str) {
        self.inner.receive(wire);
    }
}

// ============================================================================
// Bridge - Outbound
// ============================================================================

impl Bridge {
    /// Calls `action` on the peer and waits for the answer, using the
    /// default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no answer arrives in time
    /// - [`Error::Remote`] if the peer answered with a failure
    /// - [`Error::TornDown`] if the bridge is or gets torn down
    pub async fn call(&self, action: impl Into<String>, payload: Option<Value>) -> Result<Value> {
        self.call_peer(action, payload, None)?.await
    }

    /// Like [`call`](Self::call) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); a zero timeout is [`Error::Config`].
    pub async fn call_with_timeout(
        &self,
        action: impl Into<String>,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_peer(action, payload, Some(timeout))?.await
    }

    /// Calls `action` with a serialized payload and decodes the result.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); [`Error::Json`] if either conversion fails.
    pub async fn call_typed<P, R>(&self, action: impl Into<String>, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(params)?;
        let result = self.call(action, Some(payload)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issues a call and returns a handle to its outcome.
    ///
    /// The pending entry and its timer exist before the envelope leaves. If
    /// the bridge is not ready yet the envelope is queued, with the timer
    /// already running.
    ///
    /// # Errors
    ///
    /// - [`Error::TornDown`] after teardown
    /// - [`Error::Config`] for a zero timeout
    /// - any error from the channel's `send`
    pub fn call_peer(
        &self,
        action: impl Into<String>,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<PendingCall> {
        let action = action.into();
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        if self.state().is_torn_down() {
            return Err(Error::TornDown);
        }

        let id = CorrelationId::generate();
        let wire = encode(&Envelope::call(
            self.schema_version(),
            id.clone(),
            &action,
            payload,
        ))?;

        let (tx, rx) = oneshot::channel();
        let token = self.inner.pending.register(
            id.clone(),
            move |outcome| {
                let _ = tx.send(outcome);
            },
            timeout,
        )?;

        debug!(%id, action = %action, timeout_ms = timeout.as_millis() as u64, "Calling peer");

        if let Err(e) = self.inner.send_or_queue(wire, Some(id.clone())) {
            self.inner.pending.cancel(&id);
            return Err(e);
        }

        Ok(PendingCall::new(token, rx))
    }

    /// Sends a fire-and-forget call. The peer never answers it.
    ///
    /// # Errors
    ///
    /// - [`Error::TornDown`] after teardown
    /// - any error from the channel's `send`
    pub fn send_event(&self, action: impl Into<String>, payload: Option<Value>) -> Result<()> {
        let action = action.into();
        let wire = encode(&Envelope::event(self.schema_version(), &action, payload))?;
        trace!(action = %action, "Sending event");
        self.inner.send_or_queue(wire, None)
    }
}

// ============================================================================
// Bridge - Inbound Handler
// ============================================================================

impl Bridge {
    /// Installs the handler for inbound calls, replacing the previous one.
    ///
    /// Calls already dispatched keep the handler they started with.
    pub fn on(&self, handler: Arc<dyn InboundHandler>) {
        *self.inner.handler.write() = handler;
        debug!(context = %self.inner.context, "Inbound handler replaced");
    }
}

// ============================================================================
// BridgeInner
// ============================================================================

impl BridgeInner {
    fn state(&self) -> BridgeState {
        self.link.lock().state
    }

    /// Sends now when ready, queues before that.
    fn send_or_queue(&self, wire: String, correlation_id: Option<CorrelationId>) -> Result<()> {
        let mut link = self.link.lock();
        if link.state.is_torn_down() {
            return Err(Error::TornDown);
        }

        if link.state.queues_calls() {
            link.outbox.push_back(Queued {
                wire,
                correlation_id,
            });
            trace!(queued = link.outbox.len(), "Queued until peer is ready");
            return Ok(());
        }

        match &link.channel {
            Some(channel) => channel.send(wire),
            None => Err(Error::ChannelClosed),
        }
    }

    /// Sends a response regardless of readiness.
    fn send_response(&self, envelope: &Envelope) -> Result<()> {
        let wire = encode(envelope)?;
        let channel = {
            let link = self.link.lock();
            if link.state.is_torn_down() {
                return Err(Error::TornDown);
            }
            link.channel.clone().ok_or(Error::ChannelClosed)?
        };
        channel.send(wire)
    }

    /// `Attached → Ready`, then flushes the queue in issue order.
    fn mark_ready(&self) {
        let mut failed = Vec::new();
        {
            let mut link = self.link.lock();
            if link.state != BridgeState::Attached {
                debug!(state = %link.state, "Ignoring ready signal");
                return;
            }
            link.state = BridgeState::Ready;

            let queued: Vec<Queued> = link.outbox.drain(..).collect();
            info!(context = %self.context, flushed = queued.len(), "Bridge ready");

            let Some(channel) = link.channel.clone() else {
                return;
            };
            for item in queued {
                if let Some(id) = &item.correlation_id
                    && !self.pending.contains(id)
                {
                    trace!(%id, "Skipping queued call that already completed");
                    continue;
                }
                if let Err(e) = channel.send(item.wire) {
                    warn!(error = %e, "Failed to flush queued envelope");
                    if let Some(id) = item.correlation_id {
                        failed.push((id, e));
                    }
                }
            }
        }

        for (id, e) in failed {
            self.pending.reject(&id, e);
        }
    }

    fn tear_down(&self) {
        let (channel, discarded) = {
            let mut link = self.link.lock();
            if link.state.is_torn_down() {
                return;
            }
            link.state = BridgeState::TornDown;
            let discarded = link.outbox.len();
            link.outbox.clear();
            (link.channel.take(), discarded)
        };

        let drained = self.pending.drain_all(|_| Error::TornDown);
        info!(context = %self.context, drained, discarded, "Bridge torn down");
        drop(channel);
    }

    fn receive(self: &Arc<Self>, wire: &str) {
        trace!(len = wire.len(), "Inbound message");
        if self.state().is_torn_down() {
            trace!("Dropping message after teardown");
            return;
        }

        let envelope = match decode(wire) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.handle_parse_error(err);
                return;
            }
        };

        if let Err(e) = self.gate.check(envelope.schema_version) {
            trace!(error = %e, "Dropping envelope from newer schema");
            return;
        }

        if envelope.is_ready_signal() {
            self.mark_ready();
            return;
        }

        match envelope.kind {
            EnvelopeKind::Success {
                correlation_id,
                result,
            } => {
                self.pending.resolve(&correlation_id, result);
            }
            EnvelopeKind::Failure {
                correlation_id,
                error,
            } => {
                self.pending.reject(&correlation_id, Error::remote(error));
            }
            EnvelopeKind::Call {
                correlation_id,
                action,
                payload,
            } => {
                self.dispatch_call(correlation_id, action, payload);
            }
        }
    }

    fn handle_parse_error(&self, err: ParseError) {
        if let Some(version) = err.salvaged_schema_version()
            && version > u64::from(self.gate.local())
        {
            trace!(version, "Dropping unparseable envelope from newer schema");
            return;
        }

        let Some(id) = err.salvaged_correlation_id().cloned() else {
            warn!(error = %err, "Dropping unparseable message");
            return;
        };

        // A garbled answer to one of our own calls fails that call.
        if !err.had_action() && self.pending.contains(&id) {
            warn!(%id, error = %err, "Garbled response");
            self.pending.reject(&id, Error::Parse(err));
            return;
        }

        warn!(%id, error = %err, "Answering unparseable call");
        let body = ErrorBody::new(ErrorCode::ParseError.as_str(), err.message());
        let envelope = Envelope::failure(self.gate.local(), id, body);
        if let Err(e) = self.send_response(&envelope) {
            debug!(error = %e, "Failed to send parse error response");
        }
    }

    fn dispatch_call(
        self: &Arc<Self>,
        correlation_id: Option<CorrelationId>,
        action: String,
        payload: Option<Value>,
    ) {
        let handler = Arc::clone(&*self.handler.read());
        let bridge: Weak<Self> = Arc::downgrade(self);
        let version = self.gate.local();

        debug!(
            id = ?correlation_id,
            action = %action,
            context = %self.context,
            "Dispatching inbound call"
        );

        let job_action = action.clone();
        let job = async move {
            let action = job_action;
            let outcome = catch_panic(handler.handle(&action, payload)).await;

            let Some(id) = correlation_id else {
                if let Err(e) = outcome {
                    debug!(action = %action, error = %e, "Event handler failed");
                }
                return;
            };

            let envelope = match outcome {
                Ok(Reply::Value(result)) => Envelope::success(version, id, result),
                Ok(Reply::NoReply) => {
                    trace!(%id, action = %action, "Handler chose not to reply");
                    return;
                }
                Err(e) => Envelope::failure(version, id, e.to_error_body()),
            };

            let Some(inner) = bridge.upgrade() else {
                return;
            };
            if let Err(e) = inner.send_response(&envelope) {
                debug!(action = %action, error = %e, "Failed to send response");
            }
        };

        if let Err(e) = self.dispatcher.run_on(self.context, job) {
            warn!(action = %action, error = %e, "Failed to schedule inbound call");
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.tear_down();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use crate::context::HOST_THREAD_NAME;
    use crate::protocol::READY_ACTION;
    use crate::transport::MemoryChannel;

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn host_bridge() -> Bridge {
        let bridge = Bridge::builder()
            .context(ExecutionContext::Host)
            .build()
            .expect("build host");

        let commands = bridge.commands();
        commands
            .register_fn("echo", |payload| async move {
                Ok(Reply::Value(payload.unwrap_or_default()))
            })
            .expect("echo");
        commands
            .register_fn("delay", |payload| async move {
                let ms = payload.as_ref().and_then(Value::as_u64).unwrap_or(0);
                sleep(Duration::from_millis(ms)).await;
                Ok(Reply::Value(json!(ms)))
            })
            .expect("delay");
        commands
            .register_fn("fail", |_| async { Err(Error::internal("boom")) })
            .expect("fail");
        commands
            .register_fn("thread", |_| async {
                Ok(Reply::Value(json!(std::thread::current().name())))
            })
            .expect("thread");
        bridge
    }

    fn script_bridge() -> Bridge {
        Bridge::builder()
            .context(ExecutionContext::Script)
            .build()
            .expect("build script")
    }

    /// Host and script bridges over a memory channel, both ready.
    async fn linked() -> (Bridge, Bridge) {
        let (host_end, script_end) = MemoryChannel::pair();
        let host = host_bridge();
        let script = script_bridge();
        host.attach(Arc::new(host_end)).expect("attach host");
        script.attach(Arc::new(script_end)).expect("attach script");
        script.announce_ready().expect("announce");
        wait_for(|| host.state() == BridgeState::Ready).await;
        (host, script)
    }

    /// Host bridge whose peer is the raw far end of a memory channel.
    fn raw_peer(host: &Bridge) -> (Arc<MemoryChannel>, mpsc::UnboundedReceiver<Value>) {
        let (near, far) = MemoryChannel::pair();
        host.attach(Arc::new(near)).expect("attach");

        let (tx, rx) = mpsc::unbounded_channel();
        far.on_receive(Arc::new(move |wire: String| {
            let value: Value = serde_json::from_str(&wire).expect("peer got JSON");
            let _ = tx.send(value);
        }));
        (Arc::new(far), rx)
    }

    async fn make_ready(host: &Bridge, far: &MemoryChannel) {
        far.send(r#"{"schemaVersion":1,"action":"bridge.ready"}"#.to_string())
            .expect("send ready");
        wait_for(|| host.state() == BridgeState::Ready).await;
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message in time")
            .expect("channel open")
    }

    async fn silent(rx: &mut mpsc::UnboundedReceiver<Value>) -> bool {
        timeout(Duration::from_millis(100), rx.recv()).await.is_err()
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    // ------------------------------------------------------------------------
    // Round trips
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (host, script) = linked().await;

        let result = script
            .call("echo", Some(json!({"x": 1})))
            .await
            .expect("echo");
        assert_eq!(result, json!({"x": 1}));
        assert_eq!(script.pending_count(), 0);
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_host_calls_script() {
        let (host, script) = linked().await;
        script
            .commands()
            .register_typed("device.info", |(): ()| async { Ok(json!({"os": "test"})) })
            .expect("register");

        let info = host.call("device.info", None).await.expect("call");
        assert_eq!(info, json!({"os": "test"}));
    }

    #[tokio::test]
    async fn test_call_typed() {
        #[derive(Serialize, Deserialize)]
        struct Sum {
            a: i64,
            b: i64,
        }

        #[derive(Deserialize, Debug, PartialEq)]
        struct Total {
            total: i64,
        }

        let (host, script) = linked().await;
        host.commands()
            .register_typed("math.add", |s: Sum| async move {
                Ok(json!({"total": s.a + s.b}))
            })
            .expect("register");

        let total: Total = script
            .call_typed("math.add", &Sum { a: 2, b: 3 })
            .await
            .expect("call");
        assert_eq!(total, Total { total: 5 });
    }

    #[tokio::test]
    async fn test_host_handlers_run_on_ui_thread() {
        let (_host, script) = linked().await;

        let name = script.call("thread", None).await.expect("call");
        assert_eq!(name, json!(HOST_THREAD_NAME));
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces() {
        let (_host, script) = linked().await;

        let err = script.call("fail", None).await.unwrap_err();
        match err {
            Error::Remote { code, message } => {
                assert_eq!(code, "INTERNAL_ERROR");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (_host, script) = linked().await;

        let slow = script
            .call_peer("delay", Some(json!(150)), None)
            .expect("slow");
        let fast = script
            .call_peer("delay", Some(json!(10)), None)
            .expect("fast");

        let mut slow = slow;
        let fast = fast.await.expect("fast result");
        assert_eq!(fast, json!(10));
        assert!(timeout(Duration::from_millis(10), &mut slow).await.is_err());

        let slow = slow.await.expect("slow result");
        assert_eq!(slow, json!(150));
    }

    #[tokio::test]
    async fn test_round_trip_over_websocket() -> anyhow::Result<()> {
        use crate::transport::{WebSocketChannel, WebSocketListener};

        let listener = WebSocketListener::bind_localhost().await?;
        let url = listener.ws_url();
        let (host_end, script_end) =
            tokio::try_join!(listener.accept(), WebSocketChannel::connect(&url))?;

        let host = host_bridge();
        let script = script_bridge();
        host.attach(Arc::new(host_end))?;
        script.attach(Arc::new(script_end))?;
        script.announce_ready()?;

        let result = script.call("echo", Some(json!(["a", "b"]))).await?;
        assert_eq!(result, json!(["a", "b"]));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Timeouts and cancellation
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_timeout_then_late_response_ignored() {
        let (_host, script) = linked().await;

        let err = script
            .call_with_timeout("delay", Some(json!(200)), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(script.pending_count(), 0);

        // The late response finds no entry.
        sleep(Duration::from_millis(250)).await;
        assert_eq!(script.pending_count(), 0);
        assert_eq!(script.state(), BridgeState::Ready);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let (_host, script) = linked().await;
        let err = script
            .call_peer("echo", None, Some(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(script.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_then_late_response() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);
        make_ready(&host, &far).await;

        let call = host.call_peer("device.info", None, None).expect("call");
        let sent = next(&mut rx).await;
        assert_eq!(sent["correlationId"], json!(call.id().as_str()));

        assert!(call.cancel());
        let late = json!({
            "schemaVersion": 1,
            "correlationId": call.id().as_str(),
            "result": "too late",
        });
        far.send(late.to_string()).expect("send");
        sleep(Duration::from_millis(20)).await;

        assert_eq!(host.pending_count(), 0);
        assert!(matches!(call.await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out_on_schedule() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);
        make_ready(&host, &far).await;

        let limit = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let call = host
            .call_peer("device.info", None, Some(limit))
            .expect("call");
        assert_eq!(next(&mut rx).await["action"], json!("device.info"));

        let err = call.await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= limit, "timed out early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "timed out late: {elapsed:?}");
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_from_plain_thread() {
        let (host, script) = linked().await;
        script
            .commands()
            .register_fn("device.info", |_| async { Ok(Reply::Value(json!("plain"))) })
            .expect("register");
        script
            .commands()
            .register_fn("slow", |_| async {
                sleep(Duration::from_millis(500)).await;
                Ok(Reply::null())
            })
            .expect("register");

        let caller = host.clone();
        let call = std::thread::spawn(move || caller.call_peer("device.info", None, None))
            .join()
            .expect("thread finished")
            .expect("call issued");
        assert_eq!(call.await.expect("answered"), json!("plain"));

        let caller = host.clone();
        let expiring = std::thread::spawn(move || {
            caller.call_peer("slow", None, Some(Duration::from_millis(30)))
        })
        .join()
        .expect("thread finished")
        .expect("call issued");
        assert!(expiring.await.unwrap_err().is_timeout());
    }

    // ------------------------------------------------------------------------
    // Inbound pipeline
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_event_with_failing_handler_sends_nothing() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        far.send(r#"{"schemaVersion":1,"action":"fail"}"#.to_string())
            .expect("send event");
        far.send(r#"{"schemaVersion":1,"correlationId":"c2","action":"echo","payload":2}"#.to_string())
            .expect("send call");

        let first = next(&mut rx).await;
        assert_eq!(first["correlationId"], json!("c2"));
        assert_eq!(first["result"], json!(2));
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_newer_schema_silently_dropped() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        far.send(r#"{"schemaVersion":2,"correlationId":"new","action":"echo"}"#.to_string())
            .expect("send newer");
        far.send(r#"{"schemaVersion":1,"correlationId":"old","action":"echo"}"#.to_string())
            .expect("send current");

        let first = next(&mut rx).await;
        assert_eq!(first["correlationId"], json!("old"));
        assert!(first.get("result").is_some());
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        far.send(r#"{"schemaVersion":1,"action":"nope"}"#.to_string())
            .expect("send event");
        far.send(r#"{"schemaVersion":1,"correlationId":"u1","action":"nope"}"#.to_string())
            .expect("send call");

        let reply = next(&mut rx).await;
        assert_eq!(reply["correlationId"], json!("u1"));
        assert_eq!(reply["error"]["code"], json!("UNKNOWN_ACTION"));
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_parse_error_answered_when_id_salvaged() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        far.send("not json at all".to_string()).expect("send garbage");
        far.send(r#"{"correlationId":"p1","action":"echo"}"#.to_string())
            .expect("send versionless");

        let reply = next(&mut rx).await;
        assert_eq!(reply["correlationId"], json!("p1"));
        assert_eq!(reply["error"]["code"], json!("PARSE_ERROR"));
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_garbled_response_fails_pending_call() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);
        make_ready(&host, &far).await;

        let call = host.call_peer("device.info", None, None).expect("call");
        let _ = next(&mut rx).await;

        let garbled = json!({
            "schemaVersion": 1,
            "correlationId": call.id().as_str(),
            "result": 1,
            "error": {"code": "INTERNAL_ERROR", "message": "x"},
        });
        far.send(garbled.to_string()).expect("send");

        let err = call.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_no_reply_handler_sends_nothing() {
        let host = host_bridge();
        host.commands()
            .register_fn("log", |_| async { Ok(Reply::NoReply) })
            .expect("register");
        let (far, mut rx) = raw_peer(&host);

        far.send(r#"{"schemaVersion":1,"correlationId":"n1","action":"log"}"#.to_string())
            .expect("send");
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_last_handler_wins() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        let first = Arc::new(CommandRegistry::new());
        first
            .register_fn("who", |_| async { Ok(Reply::Value(json!("first"))) })
            .expect("register");
        let second = Arc::new(CommandRegistry::new());
        second
            .register_fn("who", |_| async { Ok(Reply::Value(json!("second"))) })
            .expect("register");

        host.on(first);
        host.on(second);

        far.send(r#"{"schemaVersion":1,"correlationId":"w","action":"who"}"#.to_string())
            .expect("send");
        assert_eq!(next(&mut rx).await["result"], json!("second"));
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_calls_queued_until_ready() {
        let host = host_bridge();
        assert_eq!(host.state(), BridgeState::Uninitialized);

        // Issued before attach: still queued, not dropped.
        let early = host.call_peer("first", None, None).expect("early call");
        let (far, mut rx) = raw_peer(&host);
        assert_eq!(host.state(), BridgeState::Attached);
        let attached = host.call_peer("second", None, None).expect("queued call");
        assert!(silent(&mut rx).await);

        make_ready(&host, &far).await;
        let sent_first = next(&mut rx).await;
        let sent_second = next(&mut rx).await;
        assert_eq!(sent_first["action"], json!("first"));
        assert_eq!(sent_second["action"], json!("second"));

        for (call, value) in [(early, 1), (attached, 2)] {
            let answer = json!({
                "schemaVersion": 1,
                "correlationId": call.id().as_str(),
                "result": value,
            });
            far.send(answer.to_string()).expect("send");
            assert_eq!(call.await.expect("answered"), json!(value));
        }
    }

    #[tokio::test]
    async fn test_expired_queued_call_not_flushed() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);

        let err = host
            .call_with_timeout("stale", None, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let _fresh = host.call_peer("fresh", None, None).expect("call");
        make_ready(&host, &far).await;

        assert_eq!(next(&mut rx).await["action"], json!("fresh"));
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_teardown_drains_pending() {
        let host = host_bridge();
        let (far, mut rx) = raw_peer(&host);
        make_ready(&host, &far).await;

        let a = host.call_peer("a", None, None).expect("a");
        let b = host.call_peer("b", None, None).expect("b");
        let _ = next(&mut rx).await;
        let _ = next(&mut rx).await;
        assert_eq!(host.pending_count(), 2);

        host.tear_down();
        host.tear_down();

        assert!(matches!(a.await, Err(Error::TornDown)));
        assert!(matches!(b.await, Err(Error::TornDown)));
        assert_eq!(host.pending_count(), 0);
        assert_eq!(host.state(), BridgeState::TornDown);

        assert!(matches!(host.call("c", None).await, Err(Error::TornDown)));
        assert!(matches!(host.send_event("d", None), Err(Error::TornDown)));
        assert!(host.attach(far).is_err());
    }

    #[tokio::test]
    async fn test_channel_close_tears_down() {
        let host = host_bridge();
        let (far, _rx) = raw_peer(&host);
        make_ready(&host, &far).await;

        let call = host.call_peer("a", None, None).expect("call");
        far.close();

        assert!(matches!(call.await, Err(Error::TornDown)));
        assert_eq!(host.state(), BridgeState::TornDown);
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let host = host_bridge();
        let (_far, _rx) = raw_peer(&host);
        let (other, _) = MemoryChannel::pair();

        let err = host.attach(Arc::new(other)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_announce_before_attach_fails() {
        let script = script_bridge();
        assert!(matches!(script.announce_ready(), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_announce_ready_sends_signal() {
        let script = script_bridge();
        let (_far, mut rx) = raw_peer(&script);

        script.announce_ready().expect("announce");
        script.announce_ready().expect("idempotent");

        let signal = next(&mut rx).await;
        assert_eq!(signal["action"], json!(READY_ACTION));
        assert!(signal.get("correlationId").is_none());
        assert!(signal.get("payload").is_none());
        assert_eq!(script.state(), BridgeState::Ready);
        assert!(silent(&mut rx).await);
    }

    #[tokio::test]
    async fn test_drop_drains_pending() {
        let host = host_bridge();
        let call = host.call_peer("a", None, None).expect("call");
        drop(host);

        assert!(matches!(call.await, Err(Error::TornDown)));
    }
}
