//! Event name constants and the per-role vocabularies.
//!
//! Handlers are registered by event name. A client only accepts names from
//! its role's vocabulary plus the lifecycle events.

/// All event names, grouped by origin.
pub struct Events;

impl Events {
    // ── Lifecycle ───────────────────────────────────────────────────────
    pub const PENDING: &str = "pending";
    pub const CONNECTING: &str = "connecting";
    pub const CONNECTED: &str = "connected";
    pub const ERROR: &str = "error";
    pub const CLOSED: &str = "closed";

    // ── App: reminders and sessions ─────────────────────────────────────
    pub const REMINDER: &str = "reminder";
    pub const MESSAGING_SESSION_STARTED: &str = "messaging_session_started";
    pub const MESSAGING_SESSION_RENEWED: &str = "messaging_session_renewed";
    pub const MESSAGING_SESSION_ENDED: &str = "messaging_session_ended";
    pub const MESSAGING_CONSENT_UPDATE: &str = "messaging_consent_update";

    // ── App: inbound messages (refined from `received_message`) ─────────
    pub const RECEIVED_SMS: &str = "received_sms";
    pub const RECEIVED_FB_MESSENGER: &str = "received_fb_messenger";
    pub const RECEIVED_TELEGRAM: &str = "received_telegram";
    pub const RECEIVED_WHATSAPP: &str = "received_whatsapp";
    pub const RECEIVED_EMAIL: &str = "received_email";
    pub const VOICE_CALL: &str = "voice_call";
    pub const USSD_SESSION: &str = "ussd_session";

    // ── App: delivery and payments ──────────────────────────────────────
    pub const MESSAGE_STATUS: &str = "message_status";
    pub const SENT_MESSAGE_REACTION: &str = "sent_message_reaction";
    pub const RECEIVED_PAYMENT: &str = "received_payment";
    pub const PAYMENT_STATUS: &str = "payment_status";
    pub const CUSTOMER_ACTIVITY: &str = "customer_activity";

    // ── Simulator ───────────────────────────────────────────────────────
    pub const SEND_MESSAGE: &str = "send_message";
    pub const MAKE_VOICE_CALL: &str = "make_voice_call";
    pub const SEND_CUSTOMER_PAYMENT: &str = "send_customer_payment";
    pub const SEND_CHANNEL_PAYMENT: &str = "send_channel_payment";
    pub const CHECKOUT_PAYMENT: &str = "checkout_payment";

    // ── Wire-only ───────────────────────────────────────────────────────
    /// Discriminator of an inbound message before channel classification.
    pub const RECEIVED_MESSAGE: &str = "received_message";
    pub const WALLET_PAYMENT_STATUS: &str = "wallet_payment_status";
}

pub const LIFECYCLE_EVENTS: &[&str] = &[
    Events::PENDING,
    Events::CONNECTING,
    Events::CONNECTED,
    Events::ERROR,
    Events::CLOSED,
];

pub const APP_EVENTS: &[&str] = &[
    Events::REMINDER,
    Events::MESSAGING_SESSION_STARTED,
    Events::MESSAGING_SESSION_RENEWED,
    Events::MESSAGING_SESSION_ENDED,
    Events::MESSAGING_CONSENT_UPDATE,
    Events::RECEIVED_SMS,
    Events::RECEIVED_FB_MESSENGER,
    Events::RECEIVED_TELEGRAM,
    Events::RECEIVED_WHATSAPP,
    Events::RECEIVED_EMAIL,
    Events::VOICE_CALL,
    Events::USSD_SESSION,
    Events::MESSAGE_STATUS,
    Events::SENT_MESSAGE_REACTION,
    Events::RECEIVED_PAYMENT,
    Events::PAYMENT_STATUS,
    Events::CUSTOMER_ACTIVITY,
];

pub const SIMULATOR_EVENTS: &[&str] = &[
    Events::SEND_MESSAGE,
    Events::MAKE_VOICE_CALL,
    Events::SEND_CUSTOMER_PAYMENT,
    Events::SEND_CHANNEL_PAYMENT,
    Events::CHECKOUT_PAYMENT,
];

/// Which side of the platform a client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    App,
    Simulator,
}

impl ClientRole {
    /// Notification events this role can receive.
    pub fn notification_events(&self) -> &'static [&'static str] {
        match self {
            Self::App => APP_EVENTS,
            Self::Simulator => SIMULATOR_EVENTS,
        }
    }

    /// Every event name a handler may be registered for.
    pub fn vocabulary(&self) -> Vec<&'static str> {
        let mut names = self.notification_events().to_vec();
        names.extend_from_slice(LIFECYCLE_EVENTS);
        names
    }

    pub fn accepts(&self, event: &str) -> bool {
        is_lifecycle_event(event) || self.notification_events().contains(&event)
    }

    pub fn is_simulator(&self) -> bool {
        matches!(self, Self::Simulator)
    }
}

pub fn is_lifecycle_event(event: &str) -> bool {
    LIFECYCLE_EVENTS.contains(&event)
}

/// Type alias for event names.
pub type EventName = &'static str;
