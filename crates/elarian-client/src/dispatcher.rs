//! NotificationDispatcher — answers every server push with exactly one reply.
//!
//! Each push is decoded, classified, and handed to its registered handler
//! (or the default handler) on a separate task. The handler replies through
//! a single-shot [`ReplyCallback`]; if it does not reply within the reply
//! timeout, the dispatcher answers with the incoming app data unchanged.

use std::sync::Arc;
use std::time::Duration;

use elarian_protocol::notification::AppDataUpdate;
use elarian_protocol::{
    ClientRole, DataMapValue, Payload, RemoteError, ServerToAppNotificationReply,
    ServerToSimulatorNotificationReply,
};
use elarian_transport::InboundHandler;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::classify::{self, Inbound};
use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// Application state attached to a customer.
#[derive(Debug, Clone, PartialEq)]
pub enum AppData {
    Json(Value),
    Bytes(Vec<u8>),
}

impl AppData {
    /// What handlers receive when the platform sent no app data.
    pub fn empty() -> Self {
        Self::Json(Value::Object(Map::new()))
    }

    pub fn from_wire(value: Option<DataMapValue>) -> Result<Self, DispatchError> {
        match value {
            None => Ok(Self::empty()),
            Some(DataMapValue::StringVal(raw)) => serde_json::from_str(&raw)
                .map(Self::Json)
                .map_err(DispatchError::AppData),
            Some(DataMapValue::BytesVal(bytes)) => Ok(Self::Bytes(bytes)),
        }
    }

    pub fn into_wire(self) -> DataMapValue {
        match self {
            Self::Json(value) => DataMapValue::StringVal(value.to_string()),
            Self::Bytes(bytes) => DataMapValue::BytesVal(bytes),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }
}

/// A classified notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Public event name, e.g. `received_sms`.
    pub event: &'static str,
    /// Normalized body as a JSON object.
    pub payload: Value,
}

impl Notification {
    pub fn new(event: &'static str, payload: Value) -> Self {
        Self { event, payload }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn text(&self) -> Option<&str> {
        self.get("text").and_then(Value::as_str)
    }
}

type ReplyResult = Result<Payload, DispatchError>;

struct ReplySlot {
    sender: Mutex<Option<oneshot::Sender<ReplyResult>>>,
    incoming: Option<DataMapValue>,
    simulator: bool,
}

/// Single-shot reply handle given to a notification handler.
///
/// The first of `reply` or the dispatcher's timeout wins; every later call
/// is a no-op.
#[derive(Clone)]
pub struct ReplyCallback {
    slot: Arc<ReplySlot>,
}

impl ReplyCallback {
    fn new(
        sender: oneshot::Sender<ReplyResult>,
        incoming: Option<DataMapValue>,
        simulator: bool,
    ) -> Self {
        Self {
            slot: Arc::new(ReplySlot {
                sender: Mutex::new(Some(sender)),
                incoming,
                simulator,
            }),
        }
    }

    /// Answer the notification. `data_update: None` echoes the app data the
    /// notification arrived with. Returns `false` if a reply was already
    /// produced.
    pub fn reply(&self, message: Option<Value>, data_update: Option<AppData>) -> bool {
        let Some(sender) = self.claim() else {
            return false;
        };
        let _ = sender.send(self.build(message, data_update));
        true
    }

    pub fn is_done(&self) -> bool {
        self.slot.sender.lock().is_none()
    }

    /// Claim the slot for the timeout fallback.
    fn expire(&self) -> Option<ReplyResult> {
        self.claim().map(|_| self.build(None, None))
    }

    fn claim(&self) -> Option<oneshot::Sender<ReplyResult>> {
        self.slot.sender.lock().take()
    }

    fn build(&self, message: Option<Value>, data_update: Option<AppData>) -> ReplyResult {
        let encoded = if self.slot.simulator {
            Payload::from_json(&ServerToSimulatorNotificationReply {})
        } else {
            let data = data_update
                .map(AppData::into_wire)
                .or_else(|| self.slot.incoming.clone());
            Payload::from_json(&ServerToAppNotificationReply {
                message,
                data_update: data.map(|data| AppDataUpdate { data }),
            })
        };
        encoded.map_err(DispatchError::Encode)
    }
}

/// Routes inbound pushes for one client.
pub struct NotificationDispatcher {
    role: ClientRole,
    registry: Arc<HandlerRegistry>,
    reply_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, reply_timeout: Duration) -> Self {
        Self {
            role: registry.role(),
            registry,
            reply_timeout,
        }
    }

    pub async fn dispatch(&self, payload: Payload) -> Result<Payload, DispatchError> {
        let Inbound {
            notification,
            customer,
            app_data,
        } = classify::decode(self.role, &payload)?;

        let event = notification.event;
        let handler_data = AppData::from_wire(app_data.clone())?;
        debug!("Dispatching {event}");

        let (tx, mut rx) = oneshot::channel();
        let callback = ReplyCallback::new(tx, app_data, self.role.is_simulator());
        let handler = self.registry.resolve(event);

        let task_callback = callback.clone();
        tokio::spawn(async move {
            let result = match handler {
                Some(handler) => {
                    handler
                        .call(notification, customer, handler_data, task_callback)
                        .await
                }
                None => {
                    info!("No handler for notification {event}: {}", notification.payload);
                    task_callback.reply(None, None);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!("Handler for {event} failed: {e}");
            }
        });

        match tokio::time::timeout(self.reply_timeout, &mut rx).await {
            Ok(reply) => reply.map_err(|_| DispatchError::ReplyDropped)?,
            Err(_) => match callback.expire() {
                Some(fallback) => {
                    debug!("Handler for {event} did not reply in {:?}", self.reply_timeout);
                    fallback
                }
                // Replied between the timeout firing and the claim.
                None => rx.await.map_err(|_| DispatchError::ReplyDropped)?,
            },
        }
    }
}

impl InboundHandler for NotificationDispatcher {
    async fn handle_request(&self, payload: Payload) -> Result<Payload, RemoteError> {
        self.dispatch(payload).await.map_err(|e| {
            warn!("Failed to dispatch notification: {e}");
            RemoteError::application(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(incoming: Option<DataMapValue>) -> (ReplyCallback, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        (ReplyCallback::new(tx, incoming, false), rx)
    }

    #[tokio::test]
    async fn reply_is_single_shot() {
        let (cb, rx) = callback(None);
        assert!(cb.reply(Some(serde_json::json!({"body": {"text": "hi"}})), None));
        assert!(!cb.reply(None, None));
        assert!(cb.is_done());

        let reply: ServerToAppNotificationReply = rx.await.unwrap().unwrap().json().unwrap();
        assert!(reply.message.is_some());
    }

    #[tokio::test]
    async fn omitted_update_echoes_incoming_data() {
        let incoming = DataMapValue::StringVal("{\"n\":1}".into());
        let (cb, rx) = callback(Some(incoming.clone()));
        cb.reply(None, None);

        let reply: ServerToAppNotificationReply = rx.await.unwrap().unwrap().json().unwrap();
        assert_eq!(reply.data_update.unwrap().data, incoming);
    }

    #[tokio::test]
    async fn expire_wins_over_late_reply() {
        let (cb, rx) = callback(None);
        let fallback = cb.expire().unwrap().unwrap();
        assert!(!cb.reply(Some(Value::Null), None));

        let reply: ServerToAppNotificationReply = fallback.json().unwrap();
        assert_eq!(reply, ServerToAppNotificationReply::default());
        assert!(rx.await.is_err());
    }

    #[test]
    fn app_data_from_wire() {
        assert_eq!(AppData::from_wire(None).unwrap(), AppData::empty());
        assert_eq!(
            AppData::from_wire(Some(DataMapValue::BytesVal(vec![1, 2]))).unwrap(),
            AppData::Bytes(vec![1, 2])
        );
        assert!(matches!(
            AppData::from_wire(Some(DataMapValue::StringVal("not json".into()))),
            Err(DispatchError::AppData(_))
        ));
    }
}
