//! WebSocket channel.
//!
//! Carries wire strings as WebSocket text frames. Useful when the script
//! context lives in a webview that can open a socket to the host (dev
//! servers, desktop shells).
//!
//! # Connection Flow
//!
//! 1. Host binds [`WebSocketListener`] to `localhost:0` (random port)
//! 2. Host hands [`WebSocketListener::ws_url`] to the webview
//! 3. Script side connects ([`WebSocketChannel::connect`] from Rust peers)
//! 4. [`WebSocketListener::accept`] yields the host end of the channel
//!
//! Each channel spawns an event loop task that owns the socket.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

use super::channel::{Channel, CloseCallback, Inbox, ReceiveCallback};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for waiting for the peer to connect (30s).
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WebSocketListener
// ============================================================================

/// A bound WebSocket server waiting for the script side.
pub struct WebSocketListener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Port the server is bound to.
    port: u16,
}

impl fmt::Debug for WebSocketListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketListener")
            .field("port", &self.port)
            .finish()
    }
}

impl WebSocketListener {
    /// Binds to `ip:port`; port 0 picks a random free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "WebSocket listener bound");

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Binds to `localhost` on a random port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_localhost() -> Result<Self> {
        Self::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Accepts one connection and upgrades it to a WebSocket.
    ///
    /// # Errors
    ///
    /// - [`Error::Channel`] if no peer connects within 30s
    /// - [`Error::Channel`] if the WebSocket upgrade fails
    pub async fn accept(&self) -> Result<WebSocketChannel> {
        let (stream, addr) = timeout(ACCEPT_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| {
                Error::channel(format!(
                    "no peer connected within {}ms",
                    ACCEPT_TIMEOUT.as_millis()
                ))
            })??;

        debug!(?addr, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::channel(format!("WebSocket upgrade failed: {e}")))?;

        info!(port = self.port, ?addr, "WebSocket channel established");

        Ok(WebSocketChannel::spawn(ws_stream))
    }
}

// ============================================================================
// WebSocketChannel
// ============================================================================

/// Commands for the event loop.
enum ChannelCommand {
    /// Write one text frame.
    Send(String),
    /// Close the socket.
    Shutdown,
}

/// WebSocket-backed [`Channel`].
pub struct WebSocketChannel {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Inbound side (shared with event loop).
    inbox: Arc<Inbox>,
}

impl fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("closed", &self.inbox.is_closed())
            .finish()
    }
}

impl WebSocketChannel {
    /// Connects to a WebSocket server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the connection or handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        debug!(url, "WebSocket channel connected");
        Ok(Self::spawn(ws_stream))
    }

    /// Wraps an established stream and spawns its event loop.
    pub fn spawn<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let inbox = Arc::new(Inbox::default());

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&inbox),
        ));

        Self { command_tx, inbox }
    }

    /// Closes the socket.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        inbox: Arc<Inbox>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Frame received");
                            inbox.deliver(text.to_string());
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the bridge
                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(error = %e, "Failed to send frame");
                                break;
                            }
                        }

                        Some(ChannelCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        inbox.close();
        debug!("Event loop terminated");
    }
}

impl Channel for WebSocketChannel {
    fn send(&self, message: String) -> Result<()> {
        if self.inbox.is_closed() {
            return Err(Error::ChannelClosed);
        }
        self.command_tx
            .send(ChannelCommand::Send(message))
            .map_err(|_| Error::ChannelClosed)
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        self.inbox.set_on_message(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        self.inbox.set_on_close(callback);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_listener_url_format() {
        let listener = WebSocketListener::bind_localhost().await.expect("bind");
        assert!(listener.port() > 0);
        assert_eq!(
            listener.ws_url(),
            format!("ws://127.0.0.1:{}", listener.port())
        );
    }

    #[tokio::test]
    async fn test_frames_round_trip() {
        let listener = WebSocketListener::bind_localhost().await.expect("bind");
        let url = listener.ws_url();

        let (host, script) = tokio::join!(listener.accept(), WebSocketChannel::connect(&url));
        let host = host.expect("accept");
        let script = script.expect("connect");

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        host.on_receive(Arc::new(move |m: String| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(m);
            }
        }));

        script.send(r#"{"schemaVersion":1,"action":"ping"}"#.into()).expect("send");
        let received = timeout(Duration::from_secs(5), rx)
            .await
            .expect("in time")
            .expect("delivered");
        assert_eq!(received, r#"{"schemaVersion":1,"action":"ping"}"#);
    }

    #[tokio::test]
    async fn test_shutdown_closes_both_ends() {
        let listener = WebSocketListener::bind_localhost().await.expect("bind");
        let url = listener.ws_url();

        let (host, script) = tokio::join!(listener.accept(), WebSocketChannel::connect(&url));
        let host = host.expect("accept");
        let script = script.expect("connect");

        let (tx, rx) = oneshot::channel::<()>();
        host.on_close(Box::new(move || {
            let _ = tx.send(());
        }));

        script.shutdown();
        timeout(Duration::from_secs(5), rx)
            .await
            .expect("in time")
            .expect("host observed close");
        assert!(matches!(host.send("x".into()), Err(Error::ChannelClosed)));
    }
}
