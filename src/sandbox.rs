//! Sandbox platform logic for the loopback server.
//!
//! Answers app commands with canned successes and turns simulator traffic
//! into app notifications: a simulated inbound message becomes a
//! `received_message` push to every connected app, and any message an app
//! replies with is forwarded back to the simulator as `send_message`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use elarian_protocol::command::{
    AppToServerCommand, AppToServerCommandReply, GenerateAuthTokenReply, ReceiveMessageCommand,
    ReceivePaymentCommand, SimulatorToServerCommand, SimulatorToServerCommandReply, TagCommandReply,
    UpdatePaymentStatusCommand,
};
use elarian_protocol::enums::CUSTOMER_NUMBER_PROVIDER;
use elarian_protocol::notification::{
    AppNotificationEntry, ChannelNumber, CustomerNotification, CustomerNumber, NotificationBody,
    ServerToAppCustomerNotification, SimulatorNotification,
};
use elarian_protocol::{
    ClientRole, DataMapValue, Payload, RemoteError, ServerToAppNotification, ServerToAppNotificationReply,
    ServerToSimulatorNotification,
};
use elarian_transport::{CommandContext, CommandHandler, PeerInfo, PlatformHandle};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Seconds a generated auth token stays valid.
const AUTH_TOKEN_LIFETIME: u64 = 3600;

#[derive(Default)]
pub struct SandboxHandler {
    /// Latest app data per customer id
    app_data: Arc<DashMap<String, DataMapValue>>,
    /// Customer numbers per transaction id, for payment status updates
    transactions: DashMap<String, (String, ChannelNumber)>,
}

impl CommandHandler for SandboxHandler {
    async fn handle_command(&self, ctx: CommandContext, payload: Payload) -> Result<Payload, RemoteError> {
        let reply = match ctx.peer.role {
            ClientRole::App => {
                let command: AppToServerCommand = decode(&payload)?;
                encode(&self.handle_app_command(&ctx.peer, command))?
            }
            ClientRole::Simulator => {
                let command: SimulatorToServerCommand = decode(&payload)?;
                encode(&self.handle_simulator_command(&ctx, command).await)?
            }
        };
        Ok(reply)
    }
}

impl SandboxHandler {
    fn handle_app_command(&self, peer: &PeerInfo, command: AppToServerCommand) -> AppToServerCommandReply {
        match command {
            AppToServerCommand::GenerateAuthToken(_) => {
                debug!("Issuing auth token for app {}", peer.app_id);
                AppToServerCommandReply::GenerateAuthToken(GenerateAuthTokenReply {
                    token: uuid::Uuid::new_v4().to_string(),
                    lifetime: AUTH_TOKEN_LIFETIME,
                })
            }
            AppToServerCommand::AddCustomerReminderTag(cmd) => {
                info!("Reminder {} scheduled for tag {}={}", cmd.reminder.key, cmd.tag.key, cmd.tag.value);
                tag_reply(true, "Reminder scheduled")
            }
            AppToServerCommand::CancelCustomerReminderTag(cmd) => {
                if cmd.key.is_empty() {
                    return tag_reply(false, "Reminder key is required");
                }
                info!("Reminder {} cancelled for tag {}={}", cmd.key, cmd.tag.key, cmd.tag.value);
                tag_reply(true, "Reminder cancelled")
            }
        }
    }

    async fn handle_simulator_command(
        &self,
        ctx: &CommandContext,
        command: SimulatorToServerCommand,
    ) -> SimulatorToServerCommandReply {
        match command {
            SimulatorToServerCommand::ReceiveMessage(cmd) => self.receive_message(ctx, cmd).await,
            SimulatorToServerCommand::ReceivePayment(cmd) => self.receive_payment(ctx, cmd).await,
            SimulatorToServerCommand::UpdatePaymentStatus(cmd) => self.update_payment_status(ctx, cmd).await,
        }
    }

    async fn receive_message(&self, ctx: &CommandContext, cmd: ReceiveMessageCommand) -> SimulatorToServerCommandReply {
        let mut extra = serde_json::Map::new();
        extra.insert("session_id".into(), json!(cmd.session_id));
        let body = NotificationBody {
            customer_number: Some(cellular(&cmd.customer_number)),
            channel_number: Some(cmd.channel_number.clone()),
            parts: cmd.parts,
            extra,
            ..Default::default()
        };

        let customer_id = customer_id(&cmd.customer_number);
        let replies = self
            .notify_apps(&ctx.platform, &customer_id, CustomerNotification::ReceivedMessage(body))
            .await;

        let message = replies.iter().find_map(|reply| reply.message.clone());
        if let Some(message) = &message {
            forward_to_simulator(
                ctx.platform.clone(),
                ctx.peer.clone(),
                &customer_id,
                &cmd.customer_number,
                cmd.channel_number,
                message.clone(),
            );
        }

        SimulatorToServerCommandReply {
            status: true,
            description: format!("Delivered to {} app(s)", replies.len()),
            message,
        }
    }

    async fn receive_payment(&self, ctx: &CommandContext, cmd: ReceivePaymentCommand) -> SimulatorToServerCommandReply {
        self.transactions.insert(
            cmd.transaction_id.clone(),
            (cmd.customer_number.clone(), cmd.channel_number.clone()),
        );

        let mut extra = serde_json::Map::new();
        extra.insert("transaction_id".into(), json!(cmd.transaction_id));
        extra.insert("value".into(), json!(cmd.value));
        let body = NotificationBody {
            customer_number: Some(cellular(&cmd.customer_number)),
            channel_number: Some(cmd.channel_number),
            status: Some(cmd.status),
            extra,
            ..Default::default()
        };

        let customer_id = customer_id(&cmd.customer_number);
        let replies = self
            .notify_apps(&ctx.platform, &customer_id, CustomerNotification::ReceivedPayment(body))
            .await;

        SimulatorToServerCommandReply {
            status: true,
            description: format!("Payment {} delivered to {} app(s)", cmd.transaction_id, replies.len()),
            message: None,
        }
    }

    async fn update_payment_status(
        &self,
        ctx: &CommandContext,
        cmd: UpdatePaymentStatusCommand,
    ) -> SimulatorToServerCommandReply {
        let Some((customer_number, channel_number)) =
            self.transactions.get(&cmd.transaction_id).map(|entry| entry.value().clone())
        else {
            return SimulatorToServerCommandReply {
                status: false,
                description: format!("Unknown transaction {}", cmd.transaction_id),
                message: None,
            };
        };

        let mut extra = serde_json::Map::new();
        extra.insert("transaction_id".into(), json!(cmd.transaction_id));
        let body = NotificationBody {
            customer_number: Some(cellular(&customer_number)),
            channel_number: Some(channel_number),
            status: Some(cmd.status),
            extra,
            ..Default::default()
        };

        let customer_id = customer_id(&customer_number);
        let replies = self
            .notify_apps(&ctx.platform, &customer_id, CustomerNotification::PaymentStatus(body))
            .await;

        SimulatorToServerCommandReply {
            status: true,
            description: format!("Status update delivered to {} app(s)", replies.len()),
            message: None,
        }
    }

    /// Push a customer notification to every app that accepts notifications,
    /// recording the app data each one returns.
    async fn notify_apps(
        &self,
        platform: &PlatformHandle,
        customer_id: &str,
        entry: CustomerNotification,
    ) -> Vec<ServerToAppNotificationReply> {
        let mut replies = Vec::new();
        for peer in platform.peers_with_role(ClientRole::App) {
            if !peer.accepts_notifications {
                continue;
            }

            let notification = ServerToAppNotification {
                entry: AppNotificationEntry::Customer(ServerToAppCustomerNotification {
                    org_id: peer.org_id.clone(),
                    app_id: peer.app_id.clone(),
                    customer_id: customer_id.to_string(),
                    created_at: Utc::now(),
                    app_data: self.app_data.get(customer_id).map(|entry| entry.value().clone()),
                    entry: entry.clone(),
                }),
            };

            let payload = match Payload::from_json(&notification) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode notification: {e}");
                    continue;
                }
            };

            match platform.push(&peer.id, payload).await {
                Ok(reply) => match reply.json::<ServerToAppNotificationReply>() {
                    Ok(reply) => {
                        if let Some(update) = &reply.data_update {
                            self.app_data.insert(customer_id.to_string(), update.data.clone());
                        }
                        replies.push(reply);
                    }
                    Err(e) => warn!("App {} sent a malformed reply: {e}", peer.id),
                },
                Err(e) => warn!("App {} failed the notification: {e}", peer.id),
            }
        }
        replies
    }
}

/// Send an app's outbound message to the simulator that triggered it.
fn forward_to_simulator(
    platform: PlatformHandle,
    simulator: PeerInfo,
    customer_id: &str,
    customer_number: &str,
    channel_number: ChannelNumber,
    message: Value,
) {
    let mut extra = serde_json::Map::new();
    extra.insert("message".into(), message);
    let notification = ServerToSimulatorNotification {
        org_id: simulator.org_id.clone(),
        app_id: Some(simulator.app_id.clone()),
        customer_id: Some(customer_id.to_string()),
        created_at: Some(Utc::now()),
        app_data: None,
        entry: SimulatorNotification::SendMessage(NotificationBody {
            customer_number: Some(cellular(customer_number)),
            channel_number: Some(channel_number),
            extra,
            ..Default::default()
        }),
    };

    tokio::spawn(async move {
        let payload = match Payload::from_json(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode send_message: {e}");
                return;
            }
        };
        if let Err(e) = platform.push(&simulator.id, payload).await {
            debug!("Simulator {} did not take send_message: {e}", simulator.id);
        }
    });
}

fn cellular(number: &str) -> CustomerNumber {
    CustomerNumber {
        number: number.to_string(),
        provider: CUSTOMER_NUMBER_PROVIDER.code_of("CELLULAR").unwrap_or(2),
        partition: None,
    }
}

/// Stable sandbox customer id for a number.
fn customer_id(number: &str) -> String {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!("el_cst_{digits}")
}

fn tag_reply(status: bool, description: &str) -> AppToServerCommandReply {
    AppToServerCommandReply::TagCommand(TagCommandReply {
        status,
        description: description.to_string(),
        work_id: status.then(|| uuid::Uuid::new_v4().to_string()),
    })
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Payload) -> Result<T, RemoteError> {
    payload
        .json()
        .map_err(|e| RemoteError::invalid(format!("Malformed command: {e}")))
}

fn encode<T: serde::Serialize>(reply: &T) -> Result<Payload, RemoteError> {
    Payload::from_json(reply).map_err(|e| RemoteError::application(format!("Failed to encode reply: {e}")))
}
