//! Loopback platform endpoint using Axum.
//!
//! Speaks the platform side of the protocol: accepts the SETUP handshake,
//! answers client commands through a [`CommandHandler`], pushes
//! notifications to connected clients and collects their replies. Used by
//! the integration tests and the `sandbox` command.

use std::future::Future;
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
use dashmap::DashMap;
use elarian_protocol::{
    ClientRole, Frame, Payload, RemoteError,
    frame::CONNECTION_STREAM,
    handshake::parse_setup,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{PeerConnection, PeerInfo};

/// Implemented by whatever plays the platform's business logic.
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle one client command and produce its reply payload.
    fn handle_command(
        &self,
        ctx: CommandContext,
        payload: Payload,
    ) -> impl Future<Output = Result<Payload, RemoteError>> + Send;
}

/// Who sent a command, plus a handle for pushing to other peers.
#[derive(Clone)]
pub struct CommandContext {
    pub peer: PeerInfo,
    pub platform: PlatformHandle,
}

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Required api key; any key is accepted when unset
    pub api_key: Option<String>,
    /// Milliseconds a new socket has to send SETUP
    pub setup_timeout_ms: u64,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            port: 0,
            hostname: "127.0.0.1".into(),
            api_key: None,
            setup_timeout_ms: 10_000,
            max_connections: Some(64),
        }
    }
}

/// Cloneable view of the connected peers.
#[derive(Clone, Default)]
pub struct PlatformHandle {
    peers: Arc<DashMap<String, Arc<PeerConnection>>>,
}

impl PlatformHandle {
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|entry| entry.info.clone()).collect()
    }

    pub fn peers_with_role(&self, role: ClientRole) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|entry| entry.info.role == role)
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.peers.len()
    }

    /// Wait until at least `count` peers of `role` are connected.
    pub async fn wait_for_peers(&self, role: ClientRole, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.peers_with_role(role).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Push a request to one peer and wait for its reply.
    pub async fn push(&self, peer_id: &str, payload: Payload) -> Result<Payload, RemoteError> {
        let peer = self
            .peers
            .get(peer_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RemoteError::connection_error(format!("Peer {peer_id} is not connected")))?;

        peer.request(payload)
            .await
            .unwrap_or_else(|_| Err(RemoteError::connection_error(format!("Peer {peer_id} disconnected"))))
    }

    /// Send a connection-level ERROR; the peer is expected to drop the session.
    pub fn send_connection_error(&self, peer_id: &str, error: RemoteError) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|peer| peer.send_frame(&Frame::error(CONNECTION_STREAM, error)))
    }

    /// Drop a peer's socket without a close handshake.
    pub fn sever(&self, peer_id: &str) -> bool {
        match self.peers.get(peer_id) {
            Some(peer) => {
                peer.sever.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn sever_all(&self) {
        for entry in self.peers.iter() {
            entry.sever.notify_one();
        }
    }
}

/// Shared state for the platform server.
struct AppState<H: CommandHandler> {
    handler: Arc<H>,
    config: PlatformConfig,
    platform: PlatformHandle,
    /// Open sockets, including those still in SETUP
    socket_count: AtomicUsize,
}

/// The loopback platform; manages WebSocket connections and routes frames.
pub struct PlatformServer {
    platform: PlatformHandle,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
    hostname: String,
}

impl PlatformServer {
    /// Bind and start serving with the given command handler.
    pub async fn start<H: CommandHandler>(config: PlatformConfig, handler: H) -> std::io::Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let platform = PlatformHandle::default();

        let state = Arc::new(AppState {
            handler: Arc::new(handler),
            config: config.clone(),
            platform: platform.clone(),
            socket_count: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Platform listening on ws://{}:{}/", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            platform,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
            hostname: config.hostname,
        })
    }

    pub fn handle(&self) -> PlatformHandle {
        self.platform.clone()
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Stop accepting connections and sever the open ones.
    pub async fn stop(&mut self) {
        self.platform.sever_all();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Platform stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: CommandHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    if let Some(max) = state.config.max_connections {
        let current = state.socket_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn health_handler<H: CommandHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.platform.client_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: CommandHandler>(socket: WebSocket, state: Arc<AppState<H>>) {
    state.socket_count.fetch_add(1, Ordering::Relaxed);
    let peer_id = uuid::Uuid::new_v4().to_string();
    debug!("Socket opened: {peer_id}");

    let (mut ws_tx, mut ws_rx) = socket.split();

    match accept_setup(&mut ws_tx, &mut ws_rx, &peer_id, &state).await {
        Some(info) => serve_peer(ws_tx, ws_rx, info, &state).await,
        None => {
            let _ = ws_tx.close().await;
        }
    }

    state.socket_count.fetch_sub(1, Ordering::Relaxed);
}

/// Wait for SETUP and validate it. Rejections are answered with an ERROR
/// on stream 0.
async fn accept_setup<H: CommandHandler>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    peer_id: &str,
    state: &AppState<H>,
) -> Option<PeerInfo> {
    let timeout = Duration::from_millis(state.config.setup_timeout_ms);

    let outcome = match tokio::time::timeout(timeout, ws_rx.next()).await {
        Err(_) => {
            warn!("Setup timeout for {peer_id}");
            Err(RemoteError::invalid_setup("Setup timeout"))
        }
        Ok(Some(Ok(Message::Binary(data)))) => match Frame::decode(data) {
            Ok(Frame::Setup(setup)) => parse_setup(&setup).and_then(|(metadata, agent)| {
                match &state.config.api_key {
                    Some(expected) if *expected != metadata.api_key => {
                        Err(RemoteError::rejected_setup("Invalid api key"))
                    }
                    _ => Ok(PeerInfo::from_setup(peer_id.to_string(), &metadata, agent)),
                }
            }),
            Ok(other) => Err(RemoteError::invalid_setup(format!(
                "Expected SETUP, got {}",
                other.frame_type().name()
            ))),
            Err(e) => Err(RemoteError::invalid_setup(format!("Malformed frame: {e}"))),
        },
        Ok(_) => return None,
    };

    match outcome {
        Ok(info) => Some(info),
        Err(error) => {
            warn!("Setup rejected for {peer_id}: {error}");
            if let Ok(bytes) = Frame::error(CONNECTION_STREAM, error).encode() {
                let _ = ws_tx.send(Message::Binary(bytes)).await;
            }
            None
        }
    }
}

async fn serve_peer<H: CommandHandler>(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    info: PeerInfo,
    state: &Arc<AppState<H>>,
) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let peer = PeerConnection::new(info, out_tx);
    let peer_id = peer.info.id.clone();
    state.platform.peers.insert(peer_id.clone(), peer.clone());
    info!(
        "Client connected: {peer_id} ({:?}, org {}, app {}) (total: {})",
        peer.info.role,
        peer.info.org_id,
        peer.info.app_id,
        state.platform.client_count()
    );

    let severed = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        peer.touch();
                        let frame = match Frame::decode(data) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Malformed frame from {peer_id}: {e}");
                                peer.send_frame(&Frame::error(
                                    CONNECTION_STREAM,
                                    RemoteError::connection_error(e.to_string()),
                                ));
                                continue;
                            }
                        };
                        if !handle_client_frame(frame, &peer, state) {
                            break false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client disconnected: {peer_id}");
                        break false;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {peer_id}: {e}");
                        break false;
                    }
                    _ => peer.touch(),
                }
            }

            outbound = out_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            warn!("Failed to send to {peer_id}: {e}");
                            break false;
                        }
                    }
                    None => break false,
                }
            }

            _ = peer.sever.notified() => {
                info!("Severing {peer_id}");
                break true;
            }
        }
    };

    state.platform.peers.remove(&peer_id);
    if !severed {
        while let Ok(msg) = out_rx.try_recv() {
            let _ = ws_tx.send(msg).await;
        }
        let _ = ws_tx.close().await;
    }
    peer.abandon_pending();
    info!("Client disconnected: {peer_id} (total: {})", state.platform.client_count());
}

/// Returns false when the connection should end.
fn handle_client_frame<H: CommandHandler>(
    frame: Frame,
    peer: &Arc<PeerConnection>,
    state: &Arc<AppState<H>>,
) -> bool {
    match frame {
        Frame::RequestResponse { stream_id, payload } => {
            let ctx = CommandContext {
                peer: peer.info.clone(),
                platform: state.platform.clone(),
            };
            let handler = state.handler.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let reply = match handler.handle_command(ctx, payload).await {
                    Ok(payload) => Frame::reply(stream_id, payload),
                    Err(error) => Frame::error(stream_id, error),
                };
                peer.send_frame(&reply);
            });
            true
        }
        Frame::Payload { stream_id, payload, .. } => {
            if !peer.complete(stream_id, Ok(payload)) {
                warn!("Reply from {} on idle stream {stream_id}", peer.info.id);
            }
            true
        }
        Frame::Error { stream_id: CONNECTION_STREAM, error } => {
            warn!("Client {} reported: {error}", peer.info.id);
            false
        }
        Frame::Error { stream_id, error } => {
            peer.complete(stream_id, Err(error));
            true
        }
        Frame::Keepalive { respond, .. } => {
            if respond {
                peer.send_frame(&Frame::keepalive(false));
            }
            true
        }
        Frame::Setup(_) => {
            peer.send_frame(&Frame::error(
                CONNECTION_STREAM,
                RemoteError::connection_error("Duplicate SETUP"),
            ));
            false
        }
    }
}
