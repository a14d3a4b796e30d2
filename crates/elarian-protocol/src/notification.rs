//! Server-pushed notifications and the replies they expect.
//!
//! Every `oneof` on the wire is an externally tagged enum here, so an entry
//! this crate does not know fails decoding instead of passing through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::Events;

// ─────────────────────────────────────────────────────────────────────────────
// Shared fields
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque per-customer application state, echoed between app and platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMapValue {
    StringVal(String),
    BytesVal(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDataUpdate {
    pub data: DataMapValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerNumber {
    pub number: String,
    /// `CUSTOMER_NUMBER_PROVIDER` code.
    pub provider: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

/// A messaging or payment channel number; `channel` is a code from the
/// matching enum family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNumber {
    pub number: String,
    pub channel: i32,
}

/// One part of an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMessageBody {
    Text(String),
    Ussd(Value),
    Media(Value),
    Location(Value),
    Email(Value),
    Voice(Value),
}

/// Notification body.
///
/// Fields that carry enum codes or need flattening are typed; everything
/// else is kept as-is in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_number: Option<CustomerNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_number: Option<ChannelNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<InboundMessageBody>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! notification_entries {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $event:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant(NotificationBody)),+
        }

        impl $name {
            /// Wire event name of this entry.
            pub fn event(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $event),+
                }
            }

            pub fn into_body(self) -> NotificationBody {
                match self {
                    $(Self::$variant(body) => body),+
                }
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → App
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToAppNotification {
    pub entry: AppNotificationEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppNotificationEntry {
    Customer(ServerToAppCustomerNotification),
    Purse(ServerToAppPurseNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToAppCustomerNotification {
    pub org_id: String,
    pub app_id: String,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<DataMapValue>,
    pub entry: CustomerNotification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToAppPurseNotification {
    pub org_id: String,
    pub app_id: String,
    pub purse_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<DataMapValue>,
    pub entry: PurseNotification,
}

notification_entries!(
    /// Notifications about a single customer.
    CustomerNotification {
        Reminder => Events::REMINDER,
        MessagingSessionStarted => Events::MESSAGING_SESSION_STARTED,
        MessagingSessionRenewed => Events::MESSAGING_SESSION_RENEWED,
        MessagingSessionEnded => Events::MESSAGING_SESSION_ENDED,
        MessagingConsentUpdate => Events::MESSAGING_CONSENT_UPDATE,
        ReceivedMessage => Events::RECEIVED_MESSAGE,
        MessageStatus => Events::MESSAGE_STATUS,
        SentMessageReaction => Events::SENT_MESSAGE_REACTION,
        ReceivedPayment => Events::RECEIVED_PAYMENT,
        PaymentStatus => Events::PAYMENT_STATUS,
        WalletPaymentStatus => Events::WALLET_PAYMENT_STATUS,
        CustomerActivity => Events::CUSTOMER_ACTIVITY,
    }
);

notification_entries!(
    /// Notifications about a purse rather than a customer.
    PurseNotification {
        PaymentStatus => Events::PAYMENT_STATUS,
    }
);

/// What an app answers to each notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerToAppNotificationReply {
    /// Outbound message to send to the customer, in the platform's message shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_update: Option<AppDataUpdate>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Simulator
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToSimulatorNotification {
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<DataMapValue>,
    pub entry: SimulatorNotification,
}

notification_entries!(
    /// Outbound activity the platform forwards to a simulator.
    SimulatorNotification {
        SendMessage => Events::SEND_MESSAGE,
        MakeVoiceCall => Events::MAKE_VOICE_CALL,
        SendCustomerPayment => Events::SEND_CUSTOMER_PAYMENT,
        SendChannelPayment => Events::SEND_CHANNEL_PAYMENT,
        CheckoutPayment => Events::CHECKOUT_PAYMENT,
    }
);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToSimulatorNotificationReply {}
