//! Client — owns the platform connection and keeps it alive.
//!
//! One [`TransportSession`] is active at a time and is replaced wholesale on
//! reconnect. After the first successful connect a liveness task checks the
//! session every `liveness_interval` and, once it has closed, reconnects
//! after a fixed `reconnect_timeout`. It keeps retrying until `disconnect()`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use elarian_protocol::handshake::{AppConnectionMetadata, ClientAgent};
use elarian_protocol::{ClientRole, Events, Payload, Setup};
use elarian_transport::{SessionEvent, TransportSession, dial};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientOptions, Credentials, Endpoint};
use crate::dispatcher::{AppData, Notification, NotificationDispatcher, ReplyCallback};
use crate::error::ClientError;
use crate::identity::CustomerHandle;
use crate::lifecycle::LifecycleEvent;
use crate::registry::{HandlerError, HandlerRegistry};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Shared handle to one platform connection. Cloning is cheap; the
/// connection closes when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    role: ClientRole,
    credentials: Credentials,
    options: ClientOptions,
    registry: Arc<HandlerRegistry>,
    endpoint: RwLock<Option<Endpoint>>,
    session: RwLock<Option<Arc<TransportSession>>>,
    connected: AtomicBool,
    /// Bumped by `disconnect()`; tasks from older generations stop.
    generation: AtomicU64,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
    /// Serializes connect, reconnect, and disconnect.
    connect_lock: tokio::sync::Mutex<()>,
}

impl Client {
    pub fn new(role: ClientRole, credentials: Credentials, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                role,
                credentials,
                options,
                registry: Arc::new(HandlerRegistry::new(role)),
                endpoint: RwLock::new(None),
                session: RwLock::new(None),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                watchdog: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                reconnect_attempts: AtomicU64::new(0),
                events,
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn role(&self) -> ClientRole {
        self.inner.role
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    /// Reconnect attempts made since this client was created.
    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Register a notification handler by event name. Fails for names outside
    /// this client's vocabulary.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> Result<&Self, ClientError>
    where
        F: Fn(Notification, Option<CustomerHandle>, AppData, ReplyCallback) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.inner.registry.on(event, handler)?;
        Ok(self)
    }

    pub fn on_lifecycle<F>(&self, event: &str, handler: F) -> Result<&Self, ClientError>
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.registry.on_lifecycle(event, handler)?;
        Ok(self)
    }

    pub fn set_on_pending<F: Fn(&LifecycleEvent) + Send + Sync + 'static>(&self, handler: F) -> &Self {
        self.inner.registry.insert_lifecycle(Events::PENDING, handler);
        self
    }

    pub fn set_on_connecting<F: Fn(&LifecycleEvent) + Send + Sync + 'static>(&self, handler: F) -> &Self {
        self.inner.registry.insert_lifecycle(Events::CONNECTING, handler);
        self
    }

    pub fn set_on_connected<F: Fn(&LifecycleEvent) + Send + Sync + 'static>(&self, handler: F) -> &Self {
        self.inner.registry.insert_lifecycle(Events::CONNECTED, handler);
        self
    }

    pub fn set_on_error<F: Fn(&LifecycleEvent) + Send + Sync + 'static>(&self, handler: F) -> &Self {
        self.inner.registry.insert_lifecycle(Events::ERROR, handler);
        self
    }

    pub fn set_on_closed<F: Fn(&LifecycleEvent) + Send + Sync + 'static>(&self, handler: F) -> &Self {
        self.inner.registry.insert_lifecycle(Events::CLOSED, handler);
        self
    }

    /// Connect to the platform. Does nothing if already connected.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<&Self, ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(self);
        }

        *self.inner.endpoint.write() = Some(endpoint.clone());
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.open_session(&endpoint, generation).await?;
        self.inner.ensure_watchdog(generation);
        Ok(self)
    }

    /// Close the connection and stop reconnecting. Always emits `closed`.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(watchdog) = self.inner.watchdog.lock().take() {
            watchdog.abort();
        }

        let _guard = self.inner.connect_lock.lock().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.reconnecting.store(false, Ordering::SeqCst);

        let session = self.inner.session.write().take();
        if let Some(session) = session {
            info!("Disconnecting session {}", session.id());
            session.close().await;
        }
        self.inner.emit(LifecycleEvent::Closed);
    }

    /// Send a command and wait for its reply. Fails without I/O when not
    /// connected.
    pub async fn send_command(&self, payload: Payload) -> Result<Payload, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let session = self.inner.session.read().clone().ok_or(ClientError::NotConnected)?;
        Ok(session.request(payload).await?)
    }

    /// Send a JSON command and decode the JSON reply.
    pub async fn command<C, R>(&self, command: &C) -> Result<R, ClientError>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let reply = self.send_command(Payload::from_json(command)?).await?;
        Ok(reply.json()?)
    }
}

impl ClientInner {
    fn emit(&self, event: LifecycleEvent) {
        match &event {
            LifecycleEvent::Error(message) => warn!("Client error: {message}"),
            other => debug!("Client {}", other.name()),
        }
        self.registry.emit_lifecycle(&event);
        let _ = self.events.send(event);
    }

    fn transport_alive(&self) -> bool {
        self.session.read().as_ref().is_some_and(|session| !session.is_closed())
    }

    fn setup(&self) -> Result<Setup, ClientError> {
        let metadata = AppConnectionMetadata {
            org_id: self.credentials.org_id.clone(),
            app_id: self.credentials.app_id.clone(),
            api_key: self.credentials.api_key().to_string(),
            simplex_mode: !self.options.allow_notifications,
            simulator_mode: self.role.is_simulator(),
        };
        let keepalive = u32::try_from(self.options.keep_alive_ms).unwrap_or(u32::MAX);
        let lifetime = u32::try_from(self.options.lifetime_ms).unwrap_or(u32::MAX);

        let mut setup = metadata.to_setup(&ClientAgent::rust(), keepalive, lifetime)?;
        if self.options.resumable {
            setup.resume_token = Some(Bytes::from(uuid::Uuid::new_v4().to_string()));
        }
        Ok(setup)
    }

    /// Dial, handshake, and install a new session. Caller holds `connect_lock`.
    async fn open_session(self: &Arc<Self>, endpoint: &Endpoint, generation: u64) -> Result<(), ClientError> {
        self.emit(LifecycleEvent::Pending);

        let url = endpoint.url();
        info!("Connecting to {url}");
        let stream = match dial(&url, self.options.connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.emit(LifecycleEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };

        self.emit(LifecycleEvent::Connecting);

        let dispatcher = Arc::new(NotificationDispatcher::new(
            self.registry.clone(),
            self.options.reply_timeout(),
        ));
        let established =
            TransportSession::establish(stream, self.setup()?, self.options.session_options(), dispatcher).await;
        let (session, events) = match established {
            Ok(established) => established,
            Err(e) => {
                self.emit(LifecycleEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            session.close().await;
            return Err(ClientError::Cancelled);
        }

        let session = Arc::new(session);
        let session_id = session.id().to_string();
        *self.session.write() = Some(session);
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {url} (session {session_id})");
        self.emit(LifecycleEvent::Connected);

        tokio::spawn(pump_session_events(Arc::downgrade(self), session_id, events));
        Ok(())
    }

    /// Drop the session if it is still the current one. Returns whether it was.
    fn release(&self, session_id: &str) -> bool {
        let released = {
            let mut slot = self.session.write();
            if slot.as_ref().is_some_and(|session| session.id() == session_id) {
                self.connected.store(false, Ordering::SeqCst);
                slot.take()
            } else {
                None
            }
        };
        released.is_some()
    }

    fn ensure_watchdog(self: &Arc<Self>, generation: u64) {
        let mut watchdog = self.watchdog.lock();
        if watchdog.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *watchdog = Some(tokio::spawn(liveness_loop(Arc::downgrade(self), generation)));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.get_mut().take() {
            watchdog.abort();
        }
        if let Some(session) = self.session.get_mut().take() {
            debug!("Last client handle dropped, closing session {}", session.id());
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { session.close().await });
            }
        }
    }
}

/// Forward one session's events into lifecycle events.
async fn pump_session_events(
    client: Weak<ClientInner>,
    session_id: String,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            return;
        };
        match event {
            SessionEvent::Error(e) => inner.emit(LifecycleEvent::Error(e.to_string())),
            SessionEvent::Closed => {
                if inner.release(&session_id) {
                    inner.emit(LifecycleEvent::Closed);
                }
            }
        }
    }
}

async fn liveness_loop(client: Weak<ClientInner>, generation: u64) {
    loop {
        let Some(interval) = client.upgrade().map(|inner| inner.options.liveness_interval()) else {
            return;
        };
        tokio::time::sleep(interval).await;

        let delay = {
            let Some(inner) = client.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                return;
            }
            if inner.transport_alive() {
                continue;
            }
            inner.reconnecting.store(true, Ordering::SeqCst);
            inner.options.reconnect_timeout()
        };

        warn!("Connection lost, reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;

        let Some(inner) = client.upgrade() else {
            return;
        };
        let _guard = inner.connect_lock.lock().await;
        if !inner.is_current(generation) {
            return;
        }

        let endpoint = inner.endpoint.read().clone();
        if let Some(endpoint) = endpoint.filter(|_| !inner.transport_alive()) {
            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Reconnect attempt {attempt}");
            if let Err(e) = inner.open_session(&endpoint, generation).await {
                warn!("Reconnect attempt {attempt} failed: {e}");
            }
        }
        inner.reconnecting.store(false, Ordering::SeqCst);
    }
}
