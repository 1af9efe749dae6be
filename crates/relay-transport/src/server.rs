//! WebSocket transport server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, the health probe, and shuttling frames
//! between each socket and its [`ConnectionLifecycle`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::TransportError;

/// How long a closing connection waits for its queued frames to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What the transport should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The connection reached a terminal state; close the socket.
    Close,
}

/// Per-connection protocol driver. One instance lives inside each
/// connection's task and sees that connection's inbound events in order.
pub trait ConnectionLifecycle: Send + 'static {
    /// A text frame arrived.
    fn on_message(&mut self, text: &str) -> Flow;

    /// The peer closed the connection.
    fn on_close(&mut self);

    /// The connection failed.
    fn on_error(&mut self, error: &str);
}

/// Trait implemented by the relay engine. The transport calls `connect` once
/// per upgraded socket.
pub trait RelayHandler: Send + Sync + 'static {
    type Connection: ConnectionLifecycle;

    fn connect(&self, handle: ConnectionHandle) -> Self::Connection;

    /// Number of joined sessions, reported by `/health`.
    fn session_count(&self) -> usize;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Attach a permissive CORS layer
    pub enable_cors: bool,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Log every inbound frame at debug level
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "0.0.0.0".into(),
            enable_cors: true,
            max_connections: Some(1024),
            verbose_logging: false,
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: RelayHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    /// Connected socket count (for limits and the health check)
    slots: Arc<ConnectionSlots>,
}

/// Counts open sockets against an optional limit.
///
/// A slot is reserved before the upgrade is accepted and held for the life of
/// the socket, so concurrent upgrades cannot overshoot the limit.
#[derive(Debug)]
struct ConnectionSlots {
    count: AtomicUsize,
    max: Option<usize>,
}

impl ConnectionSlots {
    fn new(max: Option<usize>) -> Self {
        Self {
            count: AtomicUsize::new(0),
            max,
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Reserve one slot, or `None` when the limit is reached.
    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match self.max {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .ok()?;
        Some(ConnectionSlot {
            slots: self.clone(),
        })
    }
}

/// A reserved slot; released on drop, including when an upgrade fails
/// before the socket handler runs.
#[derive(Debug)]
struct ConnectionSlot {
    slots: Arc<ConnectionSlots>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.slots.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The transport server: accepts sockets and hands them to the relay.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Start the transport server with the given handler.
    pub async fn start<H: RelayHandler>(
        config: TransportConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_shared(config, Arc::new(handler)).await
    }

    /// Start the transport server with a handler the caller keeps a reference
    /// to (e.g. to inspect the registry).
    pub async fn start_shared<H: RelayHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let addr_text = format!("{}:{}", config.hostname, config.port);
        let addr: SocketAddr = addr_text
            .parse()
            .map_err(|source| TransportError::InvalidAddress { addr: addr_text, source })?;

        let enable_cors = config.enable_cors;
        let state = Arc::new(AppState {
            handler,
            slots: Arc::new(ConnectionSlots::new(config.max_connections)),
            config,
        });

        // Plain `ws://host:port` clients upgrade at the root.
        let mut app = Router::new()
            .route("/", get(ws_upgrade_handler::<H>))
            .route("/ws", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state);
        if enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Relay transport listening on ws://{local_addr}/ws");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
            {
                warn!("Relay transport exited with error: {e}");
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Relay transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: RelayHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    let Some(slot) = state.slots.try_acquire() else {
        warn!(
            "Connection rejected: max connections reached ({})",
            state.slots.max.unwrap_or_default()
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, slot))
        .into_response()
}

async fn health_handler<H: RelayHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.slots.count(),
        "players": state.handler.session_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: RelayHandler>(
    socket: WebSocket,
    state: Arc<AppState<H>>,
    slot: ConnectionSlot,
) {
    let total = state.slots.count();

    let (handle, mut outbound_rx) = ConnectionHandle::channel();
    let connection_id = handle.id().to_string();
    info!("Client connected: {connection_id} (total: {total})");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drains the handle's queue into the socket. When it stops the
    // handle reports closed and broadcasts skip it.
    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                warn!("Failed to write to {writer_id}: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut connection = state.handler.connect(handle);
    let verbose = state.config.verbose_logging;

    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                if verbose {
                    debug!("Frame from {connection_id}: {}", text.as_str());
                }
                if connection.on_message(text.as_str()) == Flow::Close {
                    debug!("Client left: {connection_id}");
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    if connection.on_message(text) == Flow::Close {
                        debug!("Client left: {connection_id}");
                        break;
                    }
                }
                Err(e) => warn!("Dropping non-UTF-8 frame from {connection_id}: {e}"),
            },
            Some(Ok(Message::Close(_))) | None => {
                debug!("Client disconnected: {connection_id}");
                connection.on_close();
                break;
            }
            Some(Err(e)) => {
                warn!("WebSocket error for {connection_id}: {e}");
                connection.on_error(&e.to_string());
                break;
            }
            // Ping/pong are answered by axum.
            Some(Ok(_)) => {}
        }
    }

    // Dropping the lifecycle releases the last outbound sender so the writer
    // can flush and exit.
    drop(connection);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    drop(slot);
    info!("Client disconnected: {connection_id} (total: {})", state.slots.count());
}
