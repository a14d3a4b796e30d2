//! Per-peer state tracked by the loopback platform.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use axum::extract::ws::Message;
use dashmap::DashMap;
use elarian_protocol::{AppConnectionMetadata, ClientAgent, ClientRole, Frame, Payload, RemoteError, StreamId};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};

/// What the platform knows about a connected client.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Unique connection ID
    pub id: String,
    pub org_id: String,
    pub app_id: String,
    pub role: ClientRole,
    /// Whether the client accepts pushed notifications
    pub accepts_notifications: bool,
    pub agent: Option<ClientAgent>,
    /// When the SETUP was accepted
    pub connected_at: Instant,
}

impl PeerInfo {
    pub fn from_setup(id: String, metadata: &AppConnectionMetadata, agent: Option<ClientAgent>) -> Self {
        Self {
            id,
            org_id: metadata.org_id.clone(),
            app_id: metadata.app_id.clone(),
            role: if metadata.simulator_mode { ClientRole::Simulator } else { ClientRole::App },
            accepts_notifications: !metadata.simplex_mode,
            agent,
            connected_at: Instant::now(),
        }
    }
}

/// Live handle on a connected peer.
pub(crate) struct PeerConnection {
    pub info: PeerInfo,
    outbound: mpsc::UnboundedSender<Message>,
    pending: DashMap<StreamId, oneshot::Sender<Result<Payload, RemoteError>>>,
    /// Server-initiated streams use even ids.
    next_stream_id: AtomicU32,
    pub sever: Notify,
    pub last_activity: Mutex<Instant>,
}

impl PeerConnection {
    pub fn new(info: PeerInfo, outbound: mpsc::UnboundedSender<Message>) -> Arc<Self> {
        Arc::new(Self {
            info,
            outbound,
            pending: DashMap::new(),
            next_stream_id: AtomicU32::new(2),
            sever: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        match frame.encode() {
            Ok(bytes) => self.outbound.send(Message::Binary(bytes)).is_ok(),
            Err(_) => false,
        }
    }

    /// Start a server-initiated request; the receiver yields the client's reply.
    pub fn request(&self, payload: Payload) -> oneshot::Receiver<Result<Payload, RemoteError>> {
        let stream_id = self.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(stream_id, reply_tx);
        if !self.send_frame(&Frame::RequestResponse { stream_id, payload }) {
            self.pending.remove(&stream_id);
        }
        reply_rx
    }

    /// Route a client reply; false when nothing was waiting on the stream.
    pub fn complete(&self, stream_id: StreamId, reply: Result<Payload, RemoteError>) -> bool {
        match self.pending.remove(&stream_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(reply);
                true
            }
            None => false,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Drop every waiter; their receivers observe the disconnect.
    pub fn abandon_pending(&self) {
        self.pending.clear();
    }
}
