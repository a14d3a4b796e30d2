//! SimulatorClient — plays the customer side: injects inbound messages and
//! payments, and observes what apps send out.

use std::ops::Deref;

use elarian_protocol::command::{
    Cash, ReceiveMessageCommand, ReceivePaymentCommand, SimulatorToServerCommand,
    SimulatorToServerCommandReply, UpdatePaymentStatusCommand,
};
use elarian_protocol::enums::{MESSAGING_CHANNEL, PAYMENT_CHANNEL, PAYMENT_STATUS};
use elarian_protocol::notification::{ChannelNumber, InboundMessageBody};
use elarian_protocol::{ClientRole, Events};

use crate::client::Client;
use crate::config::{ClientOptions, Credentials, Endpoint};
use crate::error::ClientError;

#[derive(Clone)]
pub struct SimulatorClient {
    client: Client,
}

impl Deref for SimulatorClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl SimulatorClient {
    pub fn new(credentials: Credentials, options: ClientOptions) -> Self {
        Self {
            client: Client::new(ClientRole::Simulator, credentials, options),
        }
    }

    pub async fn connect(&self, endpoint: Endpoint) -> Result<&Self, ClientError> {
        self.client.connect(endpoint).await?;
        Ok(self)
    }

    notification_setters! {
        set_on_send_message => Events::SEND_MESSAGE,
        set_on_make_voice_call => Events::MAKE_VOICE_CALL,
        set_on_send_customer_payment => Events::SEND_CUSTOMER_PAYMENT,
        set_on_send_channel_payment => Events::SEND_CHANNEL_PAYMENT,
        set_on_checkout_payment => Events::CHECKOUT_PAYMENT,
    }

    /// Deliver a message from `customer_number` to the app's channel number.
    /// `channel` is a messaging channel name such as `SMS`.
    pub async fn receive_message(
        &self,
        customer_number: impl Into<String>,
        channel: &str,
        channel_number: impl Into<String>,
        session_id: impl Into<String>,
        parts: Vec<InboundMessageBody>,
    ) -> Result<SimulatorToServerCommandReply, ClientError> {
        let command = SimulatorToServerCommand::ReceiveMessage(ReceiveMessageCommand {
            customer_number: customer_number.into(),
            channel_number: ChannelNumber {
                number: channel_number.into(),
                channel: MESSAGING_CHANNEL.code_of(channel)?,
            },
            session_id: session_id.into(),
            parts,
            cost: Cash::default(),
        });
        self.simulator_command(&command).await
    }

    /// Deliver a payment from `customer_number`. `channel` is a payment
    /// channel name and `status` a payment status name.
    pub async fn receive_payment(
        &self,
        transaction_id: impl Into<String>,
        customer_number: impl Into<String>,
        channel: &str,
        channel_number: impl Into<String>,
        value: Cash,
        status: &str,
    ) -> Result<SimulatorToServerCommandReply, ClientError> {
        let command = SimulatorToServerCommand::ReceivePayment(ReceivePaymentCommand {
            transaction_id: transaction_id.into(),
            customer_number: customer_number.into(),
            channel_number: ChannelNumber {
                number: channel_number.into(),
                channel: PAYMENT_CHANNEL.code_of(channel)?,
            },
            value,
            status: PAYMENT_STATUS.code_of(status)?,
        });
        self.simulator_command(&command).await
    }

    pub async fn update_payment_status(
        &self,
        transaction_id: impl Into<String>,
        status: &str,
    ) -> Result<SimulatorToServerCommandReply, ClientError> {
        let command = SimulatorToServerCommand::UpdatePaymentStatus(UpdatePaymentStatusCommand {
            transaction_id: transaction_id.into(),
            status: PAYMENT_STATUS.code_of(status)?,
        });
        self.simulator_command(&command).await
    }

    async fn simulator_command(
        &self,
        command: &SimulatorToServerCommand,
    ) -> Result<SimulatorToServerCommandReply, ClientError> {
        let reply: SimulatorToServerCommandReply = self.command(command).await?;
        if !reply.status {
            return Err(ClientError::Protocol(reply.description));
        }
        Ok(reply)
    }
}
