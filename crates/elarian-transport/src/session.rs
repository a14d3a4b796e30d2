//! Client side of a platform connection.
//!
//! A session owns one WebSocket. A writer task drains an outbound queue, a
//! reader task routes replies to pending requests and hands server-initiated
//! requests to an [`InboundHandler`], and a keepalive task pings the peer
//! and fails the session when the peer falls silent for longer than the
//! negotiated lifetime.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use elarian_protocol::frame::CONNECTION_STREAM;
use elarian_protocol::{Frame, Payload, RemoteError, Setup, StreamId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::TransportError;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for the socket to finish its close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers requests the server initiates on this session.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle_request(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Payload, RemoteError>> + Send;
}

/// Things the session reports to its owner after it has been established.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session failed; a `Closed` follows.
    Error(TransportError),
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Interval between KEEPALIVE frames.
    pub keepalive: Duration,
    /// Maximum silence from the peer before the session fails.
    pub lifetime: Duration,
}

/// Open the WebSocket to `url`, bounded by `timeout`.
pub async fn dial(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect {
            url: url.to_string(),
            source,
        }),
        Err(_) => Err(TransportError::ConnectTimeout(url.to_string())),
    }
}

enum Outbound {
    Frame(Bytes),
    Close,
}

type PendingReply = oneshot::Sender<Result<Payload, TransportError>>;

/// State shared between the session handle and its tasks.
struct Shared {
    id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: DashMap<StreamId, PendingReply>,
    closed: watch::Sender<bool>,
    last_received: Mutex<Instant>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn touch(&self) {
        *self.last_received.lock() = Instant::now();
    }

    fn send_frame(&self, frame: &Frame) {
        match frame.encode() {
            Ok(bytes) => {
                let _ = self.outbound.send(Outbound::Frame(bytes));
            }
            Err(e) => warn!("Session {}: dropping unencodable frame: {e}", self.id),
        }
    }

    /// Close the session once. Every pending request fails with
    /// `ConnectionLost` and the owner is told why.
    fn terminate(&self, reason: Option<TransportError>) {
        let first = self.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
        if !first {
            return;
        }

        let stream_ids: Vec<StreamId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for stream_id in stream_ids {
            if let Some((_, reply)) = self.pending.remove(&stream_id) {
                let _ = reply.send(Err(TransportError::ConnectionLost));
            }
        }

        let _ = self.outbound.send(Outbound::Close);

        if let Some(error) = reason {
            warn!("Session {} failed: {error}", self.id);
            let _ = self.events.send(SessionEvent::Error(error));
        }
        info!("Session {} closed", self.id);
        let _ = self.events.send(SessionEvent::Closed);
    }
}

#[derive(Default)]
struct Tasks {
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

/// An established connection to the platform.
pub struct TransportSession {
    shared: Arc<Shared>,
    /// Client-initiated streams use odd ids.
    next_stream_id: AtomicU32,
    tasks: Mutex<Tasks>,
}

impl TransportSession {
    /// Send SETUP on a freshly dialed socket and start the session tasks.
    ///
    /// Returns the session plus the receiver of its [`SessionEvent`]s.
    pub async fn establish<H: InboundHandler>(
        stream: WsStream,
        setup: Setup,
        options: SessionOptions,
        handler: Arc<H>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), TransportError> {
        let (mut sink, stream) = stream.split();
        sink.send(Message::Binary(Frame::Setup(setup).encode()?)).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4().to_string(),
            outbound: outbound_tx,
            pending: DashMap::new(),
            closed,
            last_received: Mutex::new(Instant::now()),
            events: events_tx,
        });

        let tasks = Tasks {
            writer: Some(tokio::spawn(write_loop(sink, outbound_rx, shared.clone()))),
            reader: Some(tokio::spawn(read_loop(stream, handler, shared.clone()))),
            keepalive: Some(tokio::spawn(keepalive_loop(options, shared.clone()))),
        };

        debug!("Session {} established", shared.id);

        Ok((
            Self {
                shared,
                next_stream_id: AtomicU32::new(1),
                tasks: Mutex::new(tasks),
            },
            events_rx,
        ))
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send a REQUEST_RESPONSE and wait for the one reply on its stream.
    pub async fn request(&self, payload: Payload) -> Result<Payload, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let stream_id = self.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let frame = Frame::RequestResponse { stream_id, payload }.encode()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.insert(stream_id, reply_tx);

        // terminate() may have drained the map between the check and the insert
        if self.is_closed() || self.shared.outbound.send(Outbound::Frame(frame)).is_err() {
            self.shared.pending.remove(&stream_id);
            return Err(TransportError::Closed);
        }
        debug!("Session {}: request on stream {stream_id}", self.shared.id);

        reply_rx.await.unwrap_or(Err(TransportError::ConnectionLost))
    }

    /// Resolves once the session has closed for any reason.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Close gracefully: send the WebSocket close and wait for the socket to
    /// wind down.
    pub async fn close(&self) {
        self.shared.terminate(None);

        let (writer, reader) = {
            let mut tasks = self.tasks.lock();
            (tasks.writer.take(), tasks.reader.take())
        };
        for mut task in [writer, reader].into_iter().flatten() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                debug!("Session {}: task did not finish within {CLOSE_TIMEOUT:?}", self.shared.id);
                task.abort();
            }
        }
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock();
        for task in [tasks.writer.take(), tasks.reader.take(), tasks.keepalive.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // The writer is left running so the close frame still goes out.
        self.shared.terminate(None);
        let mut tasks = self.tasks.lock();
        for task in [tasks.reader.take(), tasks.keepalive.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(e) = sink.send(Message::Binary(bytes)).await {
                    shared.terminate(Some(TransportError::WebSocket(e)));
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.close().await;
                break;
            }
        }
    }
}

async fn read_loop<H: InboundHandler>(
    mut stream: SplitStream<WsStream>,
    handler: Arc<H>,
    shared: Arc<Shared>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                shared.touch();
                let outcome = Frame::decode(data)
                    .map_err(TransportError::from)
                    .and_then(|frame| dispatch_frame(frame, &handler, &shared));
                if let Err(e) = outcome {
                    break Some(e);
                }
            }
            Some(Ok(Message::Close(_))) | None => break None,
            Some(Ok(_)) => shared.touch(),
            Some(Err(e)) => break Some(TransportError::WebSocket(e)),
        }
    };

    if shared.is_closed() {
        return;
    }
    shared.terminate(reason);
}

fn dispatch_frame<H: InboundHandler>(
    frame: Frame,
    handler: &Arc<H>,
    shared: &Arc<Shared>,
) -> Result<(), TransportError> {
    match frame {
        Frame::Payload { stream_id, payload, .. } => {
            let (_, reply) = shared
                .pending
                .remove(&stream_id)
                .ok_or(TransportError::UnmatchedReply(stream_id))?;
            let _ = reply.send(Ok(payload));
            Ok(())
        }
        Frame::Error { stream_id: CONNECTION_STREAM, error } => Err(TransportError::Remote(error)),
        Frame::Error { stream_id, error } => {
            let (_, reply) = shared
                .pending
                .remove(&stream_id)
                .ok_or(TransportError::UnmatchedReply(stream_id))?;
            let _ = reply.send(Err(TransportError::Remote(error)));
            Ok(())
        }
        Frame::RequestResponse { stream_id, payload } => {
            let handler = handler.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                let reply = match handler.handle_request(payload).await {
                    Ok(payload) => Frame::reply(stream_id, payload),
                    Err(error) => {
                        warn!("Session {}: stream {stream_id} answered with error: {error}", shared.id);
                        Frame::error(stream_id, error)
                    }
                };
                shared.send_frame(&reply);
            });
            Ok(())
        }
        Frame::Keepalive { respond, .. } => {
            if respond {
                shared.send_frame(&Frame::keepalive(false));
            }
            Ok(())
        }
        Frame::Setup(_) => Err(TransportError::UnexpectedFrame("SETUP")),
    }
}

async fn keepalive_loop(options: SessionOptions, shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(options.keepalive.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut closed = shared.closed.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = closed.wait_for(|closed| *closed) => break,
        }

        let silent_for = shared.last_received.lock().elapsed();
        if silent_for > options.lifetime {
            shared.terminate(Some(TransportError::KeepaliveTimeout(silent_for)));
            break;
        }
        shared.send_frame(&Frame::keepalive(true));
    }
}
