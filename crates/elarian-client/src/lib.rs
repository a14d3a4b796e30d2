//! Elarian Client — a persistent platform connection for apps and simulators.
//!
//! The [`Client`] owns the connection lifecycle and request correlation,
//! the [`NotificationDispatcher`] answers server pushes through registered
//! handlers, and [`AppClient`] / [`SimulatorClient`] add the role-specific
//! handler setters and commands.

/// Generates `set_on_<event>` methods that register a notification handler
/// for a fixed event name.
macro_rules! notification_setters {
    ($($setter:ident => $event:expr),+ $(,)?) => {
        $(
            pub fn $setter<F, Fut>(&self, handler: F) -> &Self
            where
                F: Fn(
                        crate::dispatcher::Notification,
                        Option<crate::identity::CustomerHandle>,
                        crate::dispatcher::AppData,
                        crate::dispatcher::ReplyCallback,
                    ) -> Fut
                    + Send
                    + Sync
                    + 'static,
                Fut: std::future::Future<Output = Result<(), crate::registry::HandlerError>> + Send + 'static,
            {
                self.registry().insert($event, handler);
                self
            }
        )+
    };
}

pub mod app;
pub mod classify;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod simulator;

pub use app::AppClient;
pub use classify::classify;
pub use client::Client;
pub use config::{ClientOptions, Credentials, Endpoint};
pub use dispatcher::{AppData, Notification, NotificationDispatcher, ReplyCallback};
pub use error::{ClientError, DispatchError};
pub use identity::CustomerHandle;
pub use lifecycle::LifecycleEvent;
pub use registry::{HandlerError, HandlerRegistry, NotificationHandler};
pub use simulator::SimulatorClient;
