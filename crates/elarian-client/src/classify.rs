//! Turns decoded wire notifications into the named events handlers see.
//!
//! Enum codes become canonical names, message parts are flattened into
//! plain fields, and `received_message` is split by channel.

use elarian_protocol::enums::{
    CUSTOMER_NUMBER_PROVIDER, EnumFamily, MESSAGE_DELIVERY_STATUS, MESSAGE_REACTION, MESSAGING_CHANNEL,
    MESSAGING_SESSION_END_REASON, PAYMENT_CHANNEL, PAYMENT_STATUS,
};
use elarian_protocol::notification::{
    AppNotificationEntry, InboundMessageBody, NotificationBody, ServerToAppNotification,
    ServerToSimulatorNotification,
};
use elarian_protocol::{ClientRole, DataMapValue, Events, Payload};
use serde_json::{Map, Value, json};

use crate::dispatcher::Notification;
use crate::error::DispatchError;
use crate::identity::{CustomerHandle, CustomerNumberRef};

/// Public event name for a wire event. Only `received_message` is split,
/// by its canonical channel name; every other event passes through.
pub fn classify(wire_event: &'static str, channel: Option<&str>) -> &'static str {
    if wire_event != Events::RECEIVED_MESSAGE {
        return wire_event;
    }
    match channel {
        Some("SMS") => Events::RECEIVED_SMS,
        Some("VOICE") => Events::VOICE_CALL,
        Some("USSD") => Events::USSD_SESSION,
        Some("FB_MESSENGER") => Events::RECEIVED_FB_MESSENGER,
        Some("TELEGRAM") => Events::RECEIVED_TELEGRAM,
        Some("WHATSAPP") => Events::RECEIVED_WHATSAPP,
        Some("EMAIL") => Events::RECEIVED_EMAIL,
        _ => wire_event,
    }
}

/// A decoded notification ready for dispatch.
#[derive(Debug)]
pub struct Inbound {
    pub notification: Notification,
    pub customer: Option<CustomerHandle>,
    /// App data exactly as it arrived, echoed back on fallback replies.
    pub app_data: Option<DataMapValue>,
}

/// Decode one server push for the given role.
pub fn decode(role: ClientRole, payload: &Payload) -> Result<Inbound, DispatchError> {
    match role {
        ClientRole::App => decode_app(payload),
        ClientRole::Simulator => decode_simulator(payload),
    }
}

pub fn decode_app(payload: &Payload) -> Result<Inbound, DispatchError> {
    let envelope: ServerToAppNotification = payload.json().map_err(DispatchError::Decode)?;

    match envelope.entry {
        AppNotificationEntry::Customer(customer) => {
            let wire_event = customer.entry.event();
            let body = customer.entry.into_body();

            let number = body
                .customer_number
                .as_ref()
                .map(|n| -> Result<CustomerNumberRef, DispatchError> {
                    Ok(CustomerNumberRef {
                        number: n.number.clone(),
                        provider: CUSTOMER_NUMBER_PROVIDER.name_of(n.provider)?.to_string(),
                    })
                })
                .transpose()?;

            let (event, mut fields) = normalize(wire_event, body)?;
            fields.insert("org_id".into(), json!(customer.org_id));
            fields.insert("app_id".into(), json!(customer.app_id));
            fields.insert("customer_id".into(), json!(customer.customer_id));
            fields.insert("created_at".into(), json!(customer.created_at.to_rfc3339()));

            Ok(Inbound {
                notification: Notification::new(event, Value::Object(fields)),
                customer: Some(CustomerHandle::from_parts(customer.customer_id, number)),
                app_data: customer.app_data,
            })
        }
        AppNotificationEntry::Purse(purse) => {
            let wire_event = purse.entry.event();
            let (event, mut fields) = normalize(wire_event, purse.entry.into_body())?;
            fields.insert("org_id".into(), json!(purse.org_id));
            fields.insert("app_id".into(), json!(purse.app_id));
            fields.insert("purse_id".into(), json!(purse.purse_id));
            fields.insert("created_at".into(), json!(purse.created_at.to_rfc3339()));

            Ok(Inbound {
                notification: Notification::new(event, Value::Object(fields)),
                customer: None,
                app_data: purse.app_data,
            })
        }
    }
}

pub fn decode_simulator(payload: &Payload) -> Result<Inbound, DispatchError> {
    let envelope: ServerToSimulatorNotification = payload.json().map_err(DispatchError::Decode)?;
    let wire_event = envelope.entry.event();
    let (event, fields) = normalize(wire_event, envelope.entry.into_body())?;

    Ok(Inbound {
        notification: Notification::new(event, Value::Object(fields)),
        customer: None,
        app_data: envelope.app_data,
    })
}

fn is_payment_event(event: &str) -> bool {
    matches!(
        event,
        Events::RECEIVED_PAYMENT
            | Events::PAYMENT_STATUS
            | Events::WALLET_PAYMENT_STATUS
            | Events::SEND_CUSTOMER_PAYMENT
            | Events::SEND_CHANNEL_PAYMENT
            | Events::CHECKOUT_PAYMENT
    )
}

/// Canonical names for every enum field, flattened parts, and the public
/// event name.
pub fn normalize(
    wire_event: &'static str,
    body: NotificationBody,
) -> Result<(&'static str, Map<String, Value>), DispatchError> {
    let NotificationBody {
        customer_number,
        channel_number,
        status,
        reason,
        reaction,
        parts,
        extra,
    } = body;
    let mut fields = extra;

    if let Some(number) = customer_number {
        let mut value = json!({
            "number": number.number,
            "provider": CUSTOMER_NUMBER_PROVIDER.name_of(number.provider)?,
        });
        if let Some(partition) = number.partition {
            value["partition"] = json!(partition);
        }
        fields.insert("customer_number".into(), value);
    }

    let mut channel = None;
    if let Some(number) = channel_number {
        let family: &EnumFamily = if is_payment_event(wire_event) {
            &PAYMENT_CHANNEL
        } else {
            &MESSAGING_CHANNEL
        };
        let name = family.name_of(number.channel)?;
        channel = Some(name);
        fields.insert(
            "channel_number".into(),
            json!({ "number": number.number, "channel": name }),
        );
    } else if wire_event == Events::RECEIVED_MESSAGE {
        return Err(DispatchError::MissingField {
            event: wire_event,
            field: "channel_number",
        });
    }

    if let Some(code) = status {
        let value = if wire_event == Events::MESSAGE_STATUS {
            json!(MESSAGE_DELIVERY_STATUS.name_of(code)?)
        } else if is_payment_event(wire_event) {
            json!(PAYMENT_STATUS.name_of(code)?)
        } else {
            json!(code)
        };
        fields.insert("status".into(), value);
    }

    if let Some(code) = reason {
        fields.insert("reason".into(), json!(MESSAGING_SESSION_END_REASON.name_of(code)?));
    }

    if let Some(code) = reaction {
        fields.insert("reaction".into(), json!(MESSAGE_REACTION.name_of(code)?));
    }

    // Later parts of the same kind win.
    for part in parts {
        let (key, value) = match part {
            InboundMessageBody::Text(text) => ("text", Value::String(text)),
            InboundMessageBody::Ussd(input) => ("input", input),
            InboundMessageBody::Media(media) => ("media", media),
            InboundMessageBody::Location(location) => ("location", location),
            InboundMessageBody::Email(email) => ("email", email),
            InboundMessageBody::Voice(voice) => ("voice", voice),
        };
        fields.insert(key.into(), value);
    }

    Ok((classify(wire_event, channel), fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_splits_received_message_by_channel() {
        let cases = [
            ("SMS", Events::RECEIVED_SMS),
            ("VOICE", Events::VOICE_CALL),
            ("USSD", Events::USSD_SESSION),
            ("FB_MESSENGER", Events::RECEIVED_FB_MESSENGER),
            ("TELEGRAM", Events::RECEIVED_TELEGRAM),
            ("WHATSAPP", Events::RECEIVED_WHATSAPP),
            ("EMAIL", Events::RECEIVED_EMAIL),
        ];
        for (channel, expected) in cases {
            assert_eq!(classify(Events::RECEIVED_MESSAGE, Some(channel)), expected);
        }
    }

    #[test]
    fn classify_passes_other_events_through() {
        assert_eq!(classify(Events::MESSAGE_STATUS, Some("SMS")), Events::MESSAGE_STATUS);
        assert_eq!(classify(Events::REMINDER, None), Events::REMINDER);
        assert_eq!(
            classify(Events::RECEIVED_MESSAGE, Some("UNSPECIFIED")),
            Events::RECEIVED_MESSAGE
        );
    }

    #[test]
    fn normalize_flattens_parts_and_names_enums() {
        let body: NotificationBody = serde_json::from_value(json!({
            "customer_number": { "number": "+254700000000", "provider": 2 },
            "channel_number": { "number": "21356", "channel": 3 },
            "session_id": "s-1",
            "parts": [{ "ussd": "1*2" }, { "text": "first" }, { "text": "second" }]
        }))
        .unwrap();

        let (event, fields) = normalize(Events::RECEIVED_MESSAGE, body).unwrap();
        assert_eq!(event, Events::USSD_SESSION);
        assert_eq!(fields["input"], json!("1*2"));
        assert_eq!(fields["text"], json!("second"));
        assert_eq!(fields["session_id"], json!("s-1"));
        assert_eq!(fields["channel_number"]["channel"], json!("USSD"));
        assert_eq!(fields["customer_number"]["provider"], json!("CELLULAR"));
        assert!(!fields.contains_key("parts"));
    }

    #[test]
    fn normalize_uses_status_family_per_event() {
        let delivery: NotificationBody = serde_json::from_value(json!({ "status": 300 })).unwrap();
        let (_, fields) = normalize(Events::MESSAGE_STATUS, delivery).unwrap();
        assert_eq!(fields["status"], json!("DELIVERED"));

        let payment: NotificationBody = serde_json::from_value(json!({
            "status": 300,
            "channel_number": { "number": "525900", "channel": 1 }
        }))
        .unwrap();
        let (_, fields) = normalize(Events::PAYMENT_STATUS, payment).unwrap();
        assert_eq!(fields["status"], json!("SUCCESS"));
        assert_eq!(fields["channel_number"]["channel"], json!("CELLULAR"));
    }

    #[test]
    fn normalize_rejects_unknown_codes() {
        let body: NotificationBody = serde_json::from_value(json!({ "reason": 999 })).unwrap();
        let err = normalize(Events::MESSAGING_SESSION_ENDED, body).unwrap_err();
        assert!(matches!(err, DispatchError::Enum(_)));
    }

    #[test]
    fn received_message_requires_channel_number() {
        let body: NotificationBody = serde_json::from_value(json!({ "parts": [{ "text": "hi" }] })).unwrap();
        let err = normalize(Events::RECEIVED_MESSAGE, body).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingField { field: "channel_number", .. }
        ));
    }

    #[test]
    fn purse_notifications_have_no_identity() {
        let payload = Payload::from_json(&json!({
            "entry": { "purse": {
                "org_id": "org", "app_id": "app", "purse_id": "purse-1",
                "created_at": "2026-01-01T00:00:00Z",
                "entry": { "payment_status": { "status": 400 } }
            }}
        }))
        .unwrap();

        let inbound = decode_app(&payload).unwrap();
        assert!(inbound.customer.is_none());
        assert_eq!(inbound.notification.event, Events::PAYMENT_STATUS);
        assert_eq!(inbound.notification.payload["purse_id"], json!("purse-1"));
        assert_eq!(inbound.notification.payload["status"], json!("FAILED"));
    }

    #[test]
    fn customer_notifications_merge_envelope_and_identity() {
        let payload = Payload::from_json(&json!({
            "entry": { "customer": {
                "org_id": "org", "app_id": "app", "customer_id": "el_cst_1",
                "created_at": "2026-01-01T00:00:00Z",
                "app_data": { "string_val": "{\"step\":1}" },
                "entry": { "received_message": {
                    "customer_number": { "number": "+254711111111", "provider": 2 },
                    "channel_number": { "number": "21356", "channel": 1 },
                    "parts": [{ "text": "HELLO" }]
                }}
            }}
        }))
        .unwrap();

        let inbound = decode_app(&payload).unwrap();
        assert_eq!(inbound.notification.event, Events::RECEIVED_SMS);
        assert_eq!(inbound.notification.payload["customer_id"], json!("el_cst_1"));
        assert_eq!(inbound.notification.payload["org_id"], json!("org"));
        assert_eq!(inbound.notification.payload["text"], json!("HELLO"));

        let customer = inbound.customer.unwrap();
        assert_eq!(customer.id(), Some("el_cst_1"));
        assert_eq!(customer.number().unwrap().provider, "CELLULAR");
        assert_eq!(
            inbound.app_data,
            Some(DataMapValue::StringVal("{\"step\":1}".into()))
        );
    }

    #[test]
    fn simulator_notifications_are_not_merged() {
        let payload = Payload::from_json(&json!({
            "org_id": "org",
            "entry": { "send_message": {
                "customer_number": { "number": "+254711111111", "provider": 2 },
                "channel_number": { "number": "21356", "channel": 1 },
                "message": { "body": { "text": "hi" } }
            }}
        }))
        .unwrap();

        let inbound = decode_simulator(&payload).unwrap();
        assert_eq!(inbound.notification.event, Events::SEND_MESSAGE);
        assert!(inbound.customer.is_none());
        assert!(inbound.notification.payload.get("org_id").is_none());
        assert_eq!(inbound.notification.payload["channel_number"]["channel"], json!("SMS"));
    }

    #[test]
    fn simulator_payments_use_payment_families() {
        let payload = Payload::from_json(&json!({
            "org_id": "org",
            "entry": { "send_channel_payment": {
                "channel_number": { "number": "525900", "channel": 1 },
                "status": 300
            }}
        }))
        .unwrap();

        let inbound = decode_simulator(&payload).unwrap();
        assert_eq!(inbound.notification.event, Events::SEND_CHANNEL_PAYMENT);
        assert_eq!(inbound.notification.payload["channel_number"]["channel"], json!("CELLULAR"));
        assert_eq!(inbound.notification.payload["status"], json!("SUCCESS"));
    }
}
