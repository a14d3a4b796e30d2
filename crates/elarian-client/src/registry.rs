//! HandlerRegistry — event name → user handler, checked against the role's
//! vocabulary.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use elarian_protocol::ClientRole;
use elarian_protocol::events::LIFECYCLE_EVENTS;
use parking_lot::RwLock;
use tracing::debug;

use crate::dispatcher::{AppData, Notification, ReplyCallback};
use crate::error::ClientError;
use crate::identity::CustomerHandle;
use crate::lifecycle::LifecycleEvent;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Handles one kind of server-pushed notification.
///
/// Implemented for every async closure taking
/// `(Notification, Option<CustomerHandle>, AppData, ReplyCallback)`.
pub trait NotificationHandler: Send + Sync {
    fn call(
        &self,
        notification: Notification,
        customer: Option<CustomerHandle>,
        app_data: AppData,
        reply: ReplyCallback,
    ) -> HandlerFuture;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(Notification, Option<CustomerHandle>, AppData, ReplyCallback) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(
        &self,
        notification: Notification,
        customer: Option<CustomerHandle>,
        app_data: AppData,
        reply: ReplyCallback,
    ) -> HandlerFuture {
        Box::pin(self(notification, customer, app_data, reply))
    }
}

pub type LifecycleHandler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Registered handlers for one client. Registration may happen at any time,
/// including while notifications are being dispatched.
pub struct HandlerRegistry {
    role: ClientRole,
    notifications: RwLock<HashMap<&'static str, Arc<dyn NotificationHandler>>>,
    lifecycle: RwLock<HashMap<&'static str, LifecycleHandler>>,
}

impl HandlerRegistry {
    pub fn new(role: ClientRole) -> Self {
        Self {
            role,
            notifications: RwLock::new(HashMap::new()),
            lifecycle: RwLock::new(HashMap::new()),
        }
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    /// Register a notification handler by name, replacing any previous one.
    pub fn on<H>(&self, event: &str, handler: H) -> Result<(), ClientError>
    where
        H: NotificationHandler + 'static,
    {
        let Some(event) = find(event, self.role.notification_events()) else {
            // Lifecycle names belong to `on_lifecycle`; report the whole vocabulary.
            return Err(ClientError::UnexpectedEvent {
                event: event.to_string(),
                allowed: self.role.vocabulary(),
            });
        };
        self.insert(event, handler);
        Ok(())
    }

    /// Register a lifecycle hook by name (`pending`, `connecting`,
    /// `connected`, `error`, `closed`).
    pub fn on_lifecycle<F>(&self, event: &str, handler: F) -> Result<(), ClientError>
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let event = lookup(event, LIFECYCLE_EVENTS)?;
        self.insert_lifecycle(event, handler);
        Ok(())
    }

    pub(crate) fn insert_lifecycle<F>(&self, event: &'static str, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.lifecycle.write().insert(event, Arc::new(handler));
    }

    pub(crate) fn insert<H>(&self, event: &'static str, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        debug!("Registering handler for {event}");
        self.notifications.write().insert(event, Arc::new(handler));
    }

    pub fn resolve(&self, event: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.read().get(event).cloned()
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.notifications.read().contains_key(event) || self.lifecycle.read().contains_key(event)
    }

    /// Invoke the hook registered for this lifecycle event, if any.
    pub fn emit_lifecycle(&self, event: &LifecycleEvent) {
        // Clone out of the lock so a hook can register handlers.
        let hook = self.lifecycle.read().get(event.name()).cloned();
        if let Some(hook) = hook {
            hook(event);
        }
    }
}

fn find(event: &str, allowed: &'static [&'static str]) -> Option<&'static str> {
    allowed.iter().copied().find(|name| *name == event)
}

fn lookup(event: &str, allowed: &'static [&'static str]) -> Result<&'static str, ClientError> {
    find(event, allowed).ok_or_else(|| ClientError::UnexpectedEvent {
        event: event.to_string(),
        allowed: allowed.to_vec(),
    })
}
