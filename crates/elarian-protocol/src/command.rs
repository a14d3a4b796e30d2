//! Client-initiated commands and their replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notification::{ChannelNumber, InboundMessageBody};

// ─────────────────────────────────────────────────────────────────────────────
// App → Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppToServerCommand {
    GenerateAuthToken(GenerateAuthTokenCommand),
    AddCustomerReminderTag(AddCustomerReminderTagCommand),
    CancelCustomerReminderTag(CancelCustomerReminderTagCommand),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateAuthTokenCommand {}

/// Selects every customer carrying `key = value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerReminder {
    pub key: String,
    pub remind_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCustomerReminderTagCommand {
    pub tag: IndexMapping,
    pub reminder: CustomerReminder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCustomerReminderTagCommand {
    pub tag: IndexMapping,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppToServerCommandReply {
    GenerateAuthToken(GenerateAuthTokenReply),
    TagCommand(TagCommandReply),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateAuthTokenReply {
    pub token: String,
    /// Token lifetime in seconds.
    pub lifetime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCommandReply {
    pub status: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulator → Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorToServerCommand {
    ReceiveMessage(ReceiveMessageCommand),
    ReceivePayment(ReceivePaymentCommand),
    UpdatePaymentStatus(UpdatePaymentStatusCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cash {
    pub currency_code: String,
    pub amount: f64,
}

impl Default for Cash {
    fn default() -> Self {
        Self {
            currency_code: "KES".into(),
            amount: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveMessageCommand {
    pub customer_number: String,
    /// `channel` is a `MESSAGING_CHANNEL` code.
    pub channel_number: ChannelNumber,
    pub session_id: String,
    pub parts: Vec<InboundMessageBody>,
    #[serde(default)]
    pub cost: Cash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivePaymentCommand {
    pub transaction_id: String,
    pub customer_number: String,
    /// `channel` is a `PAYMENT_CHANNEL` code.
    pub channel_number: ChannelNumber,
    pub value: Cash,
    /// `PAYMENT_STATUS` code.
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentStatusCommand {
    pub transaction_id: String,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorToServerCommandReply {
    pub status: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}
