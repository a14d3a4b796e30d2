//! AppClient — receives customer and purse notifications and issues app
//! commands.

use std::ops::Deref;

use elarian_protocol::command::{
    AddCustomerReminderTagCommand, AppToServerCommand, AppToServerCommandReply,
    CancelCustomerReminderTagCommand, CustomerReminder, GenerateAuthTokenCommand, GenerateAuthTokenReply,
    IndexMapping, TagCommandReply,
};
use elarian_protocol::{ClientRole, Events};
use tracing::debug;

use crate::client::Client;
use crate::config::{ClientOptions, Credentials, Endpoint};
use crate::error::ClientError;

#[derive(Clone)]
pub struct AppClient {
    client: Client,
}

impl Deref for AppClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl AppClient {
    pub fn new(credentials: Credentials, options: ClientOptions) -> Self {
        Self {
            client: Client::new(ClientRole::App, credentials, options),
        }
    }

    pub async fn connect(&self, endpoint: Endpoint) -> Result<&Self, ClientError> {
        self.client.connect(endpoint).await?;
        Ok(self)
    }

    notification_setters! {
        set_on_reminder => Events::REMINDER,
        set_on_messaging_session_started => Events::MESSAGING_SESSION_STARTED,
        set_on_messaging_session_renewed => Events::MESSAGING_SESSION_RENEWED,
        set_on_messaging_session_ended => Events::MESSAGING_SESSION_ENDED,
        set_on_messaging_consent_update => Events::MESSAGING_CONSENT_UPDATE,
        set_on_received_sms => Events::RECEIVED_SMS,
        set_on_received_fb_messenger => Events::RECEIVED_FB_MESSENGER,
        set_on_received_telegram => Events::RECEIVED_TELEGRAM,
        set_on_received_whatsapp => Events::RECEIVED_WHATSAPP,
        set_on_received_email => Events::RECEIVED_EMAIL,
        set_on_voice_call => Events::VOICE_CALL,
        set_on_ussd_session => Events::USSD_SESSION,
        set_on_message_status => Events::MESSAGE_STATUS,
        set_on_sent_message_reaction => Events::SENT_MESSAGE_REACTION,
        set_on_received_payment => Events::RECEIVED_PAYMENT,
        set_on_payment_status => Events::PAYMENT_STATUS,
        set_on_customer_activity => Events::CUSTOMER_ACTIVITY,
    }

    /// Short-lived token for client-side SDKs.
    pub async fn generate_auth_token(&self) -> Result<GenerateAuthTokenReply, ClientError> {
        let command = AppToServerCommand::GenerateAuthToken(GenerateAuthTokenCommand {});
        match self.command(&command).await? {
            AppToServerCommandReply::GenerateAuthToken(reply) => Ok(reply),
            other => Err(unexpected_reply("generate_auth_token", &other)),
        }
    }

    /// Schedule a reminder for every customer tagged `tag`.
    pub async fn add_customer_reminder_by_tag(
        &self,
        tag: IndexMapping,
        reminder: CustomerReminder,
    ) -> Result<TagCommandReply, ClientError> {
        let command = AppToServerCommand::AddCustomerReminderTag(AddCustomerReminderTagCommand { tag, reminder });
        self.tag_command(&command).await
    }

    pub async fn cancel_customer_reminder_by_tag(
        &self,
        tag: IndexMapping,
        key: impl Into<String>,
    ) -> Result<TagCommandReply, ClientError> {
        let command = AppToServerCommand::CancelCustomerReminderTag(CancelCustomerReminderTagCommand {
            tag,
            key: key.into(),
        });
        self.tag_command(&command).await
    }

    async fn tag_command(&self, command: &AppToServerCommand) -> Result<TagCommandReply, ClientError> {
        match self.command(command).await? {
            AppToServerCommandReply::TagCommand(reply) if !reply.status => {
                Err(ClientError::Protocol(reply.description))
            }
            AppToServerCommandReply::TagCommand(reply) => {
                debug!("Tag command accepted: {:?}", reply.work_id);
                Ok(reply)
            }
            other => Err(unexpected_reply("tag command", &other)),
        }
    }
}

fn unexpected_reply(command: &str, reply: &AppToServerCommandReply) -> ClientError {
    ClientError::Protocol(format!("Unexpected reply to {command}: {reply:?}"))
}
