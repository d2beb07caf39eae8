//! Host and script bridges talking to each other.
//!
//! Demonstrates:
//! - Registering host commands (raw and typed)
//! - Script readiness and queued calls
//! - Round trips, remote failures, timeouts and events
//! - Running the same bridge over a WebSocket instead of memory
//!
//! Usage:
//!   cargo run --example echo_bridge
//!   cargo run --example echo_bridge -- --debug
//!   cargo run --example echo_bridge -- --websocket

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use webview_bridge::{
    Bridge, Channel, Error, ExecutionContext, MemoryChannel, Reply, Result, WebSocketChannel,
    WebSocketListener,
};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    websocket: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            websocket: args.iter().any(|a| a == "--websocket"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Toast {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Shown {
    chars: usize,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "webview_bridge=debug"
    } else {
        "webview_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn channels(websocket: bool) -> Result<(Arc<dyn Channel>, Arc<dyn Channel>)> {
    if !websocket {
        let (host_end, script_end) = MemoryChannel::pair();
        let host_end: Arc<dyn Channel> = Arc::new(host_end);
        let script_end: Arc<dyn Channel> = Arc::new(script_end);
        return Ok((host_end, script_end));
    }

    let listener = WebSocketListener::bind_localhost().await?;
    let url = listener.ws_url();
    println!("    Listening on {url}");

    let (host_end, script_end) =
        tokio::try_join!(listener.accept(), WebSocketChannel::connect(&url))?;
    let host_end: Arc<dyn Channel> = Arc::new(host_end);
    let script_end: Arc<dyn Channel> = Arc::new(script_end);
    Ok((host_end, script_end))
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Bridge ===\n");

    // ========================================================================
    // Host
    // ========================================================================

    println!("[1] Building host bridge...");

    let host = Bridge::builder()
        .context(ExecutionContext::Host)
        .default_timeout(Duration::from_secs(5))
        .build()?;

    host.commands().register_fn("echo", |payload| async move {
        Ok(Reply::Value(payload.unwrap_or_default()))
    })?;
    host.commands().register_typed("toast.show", |toast: Toast| async move {
        println!("    [host ui] {}", toast.message);
        Ok(Shown {
            chars: toast.message.chars().count(),
        })
    })?;
    host.commands().register_fn("slow", |_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Reply::null())
    })?;
    host.commands().register_fn("analytics.track", |payload| async move {
        println!("    [host ui] tracked {}", payload.unwrap_or_default());
        Ok(Reply::NoReply)
    })?;

    println!("    ✓ Commands: {:?}\n", host.commands().actions());

    // ========================================================================
    // Channel
    // ========================================================================

    println!(
        "[2] Connecting over {}...",
        if args.websocket { "WebSocket" } else { "memory" }
    );

    let (host_end, script_end) = channels(args.websocket).await?;
    host.attach(host_end)?;

    let script = Bridge::builder()
        .context(ExecutionContext::Script)
        .build()?;
    script.attach(script_end)?;

    // Issued before the script is ready: queued, not lost.
    let early = host.call_peer("page.title", None, None)?;
    script
        .commands()
        .register_fn("page.title", |_| async { Ok(Reply::Value(json!("Demo"))) })?;

    script.announce_ready()?;
    println!("    ✓ Script ready");
    println!("    ✓ Queued host call answered: {}\n", early.await?);

    // ========================================================================
    // Calls
    // ========================================================================

    println!("[3] Script → host calls...");

    let echoed = script.call("echo", Some(json!({"x": 1}))).await?;
    println!("    ✓ echo: {echoed}");

    let shown: Shown = script
        .call_typed("toast.show", &Toast {
            message: "Saved".to_string(),
        })
        .await?;
    println!("    ✓ toast.show: {} chars", shown.chars);

    match script.call("missing.action", None).await {
        Err(Error::Remote { code, message }) => println!("    ✓ missing.action: {code} ({message})"),
        other => println!("    ✗ unexpected: {other:?}"),
    }

    match script
        .call_with_timeout("slow", None, Duration::from_millis(50))
        .await
    {
        Err(e) if e.is_timeout() => println!("    ✓ slow: {e}"),
        other => println!("    ✗ unexpected: {other:?}"),
    }

    script.send_event("analytics.track", Some(json!({"screen": "home"})))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("    ✓ Event sent\n");

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("[4] Tearing down...");

    let dangling = script.call_peer("slow", None, None)?;
    script.tear_down();
    match dangling.await {
        Err(Error::TornDown) => println!("    ✓ Pending call failed with: torn down"),
        other => println!("    ✗ unexpected: {other:?}"),
    }
    host.tear_down();

    println!("\n=== Done ===");
    Ok(())
}
