//! End-to-end integration tests — app and simulator clients against the
//! loopback platform: handshake, lifecycle, command correlation,
//! notification dispatch, and reconnection.

use std::sync::Arc;
use std::time::Duration;

use elarian_client::{
    AppClient, ClientError, ClientOptions, Credentials, Endpoint, HandlerError, LifecycleEvent, SimulatorClient,
};
use elarian_protocol::command::{
    AppToServerCommand, AppToServerCommandReply, CustomerReminder, GenerateAuthTokenReply, IndexMapping,
    SimulatorToServerCommand, SimulatorToServerCommandReply, TagCommandReply,
};
use elarian_protocol::notification::InboundMessageBody;
use elarian_protocol::{
    ClientRole, DataMapValue, ErrorCode, Frame, Payload, RemoteError, ServerToAppNotificationReply,
};
use elarian_transport::{
    CommandContext, CommandHandler, PlatformConfig, PlatformHandle, PlatformServer, TransportError,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// Platform logic for tests: `{"echo": v, "delay_ms": n}` is echoed after a
/// delay, `{"fail": true}` is answered with an ERROR frame, and typed
/// commands get canned replies.
struct TestPlatform;

impl CommandHandler for TestPlatform {
    async fn handle_command(&self, ctx: CommandContext, payload: Payload) -> Result<Payload, RemoteError> {
        let value: Value = payload.json().map_err(|e| RemoteError::invalid(e.to_string()))?;

        if let Some(echo) = value.get("echo") {
            let delay = value["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            return Ok(Payload::from_json(&json!({ "echo": echo })).unwrap());
        }
        if value.get("fail").is_some() {
            return Err(RemoteError::invalid("Rejected by test platform"));
        }

        if ctx.peer.role == ClientRole::Simulator {
            let command: SimulatorToServerCommand =
                serde_json::from_value(value).map_err(|e| RemoteError::invalid(e.to_string()))?;
            let accepted = !matches!(&command, SimulatorToServerCommand::UpdatePaymentStatus(cmd) if cmd.transaction_id == "unknown");
            let reply = SimulatorToServerCommandReply {
                status: accepted,
                description: if accepted { "queued".into() } else { "Unknown transaction".into() },
                message: None,
            };
            return Ok(Payload::from_json(&reply).unwrap());
        }

        let command: AppToServerCommand =
            serde_json::from_value(value).map_err(|e| RemoteError::invalid(e.to_string()))?;
        let reply = match command {
            AppToServerCommand::GenerateAuthToken(_) => AppToServerCommandReply::GenerateAuthToken(GenerateAuthTokenReply {
                token: format!("token-{}", ctx.peer.app_id),
                lifetime: 3600,
            }),
            AppToServerCommand::AddCustomerReminderTag(_) => AppToServerCommandReply::TagCommand(TagCommandReply {
                status: true,
                description: "Reminder scheduled".into(),
                work_id: Some("work-1".into()),
            }),
            AppToServerCommand::CancelCustomerReminderTag(cmd) => AppToServerCommandReply::TagCommand(TagCommandReply {
                status: cmd.key != "missing",
                description: "No such reminder".into(),
                work_id: None,
            }),
        };
        Ok(Payload::from_json(&reply).unwrap())
    }
}

async fn start_platform(api_key: Option<&str>) -> (PlatformServer, PlatformHandle, u16) {
    let config = PlatformConfig {
        port: 0, // OS-assigned
        api_key: api_key.map(str::to_string),
        setup_timeout_ms: 2_000,
        ..PlatformConfig::default()
    };
    let server = PlatformServer::start(config, TestPlatform).await.unwrap();
    let platform = server.handle();
    let port = server.port();
    (server, platform, port)
}

fn test_options() -> ClientOptions {
    ClientOptions {
        keep_alive_ms: 200,
        lifetime_ms: 5_000,
        reconnect_timeout_ms: 100,
        liveness_interval_ms: 50,
        reply_timeout_ms: 300,
        connect_timeout_ms: 2_000,
        ..ClientOptions::default()
    }
}

fn credentials(api_key: &str) -> Credentials {
    Credentials::new("org-1", "app-1", api_key)
}

fn endpoint(port: u16) -> Endpoint {
    Endpoint::insecure("127.0.0.1", port)
}

async fn connected_app(port: u16) -> AppClient {
    let app = AppClient::new(credentials("key"), test_options());
    app.connect(endpoint(port)).await.unwrap();
    app
}

async fn next_event(events: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for lifecycle event")
        .expect("Lifecycle channel closed")
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<LifecycleEvent>,
    matches: impl Fn(&LifecycleEvent) -> bool,
) -> LifecycleEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

async fn only_peer(platform: &PlatformHandle, role: ClientRole) -> String {
    assert!(platform.wait_for_peers(role, 1, Duration::from_secs(5)).await);
    platform.peers_with_role(role)[0].id.clone()
}

fn customer_notification(entry: Value, app_data: Option<DataMapValue>) -> Payload {
    Payload::from_json(&json!({
        "entry": { "customer": {
            "org_id": "org-1",
            "app_id": "app-1",
            "customer_id": "el_cst_123",
            "created_at": "2026-01-01T00:00:00Z",
            "app_data": app_data,
            "entry": entry,
        }}
    }))
    .unwrap()
}

fn received_sms(text: &str) -> Value {
    json!({ "received_message": {
        "customer_number": { "number": "+254700000001", "provider": 2 },
        "channel_number": { "number": "21356", "channel": 1 },
        "session_id": "sess-1",
        "parts": [{ "text": text }]
    }})
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_disconnect_emit_lifecycle_in_order() {
    let (_server, _platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    let mut events = app.subscribe();

    assert!(!app.is_connected());
    app.connect(endpoint(port)).await.unwrap();
    assert!(app.is_connected());

    assert_eq!(next_event(&mut events).await, LifecycleEvent::Pending);
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Connecting);
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Connected);

    app.disconnect().await;
    assert!(!app.is_connected());
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Closed);

    // Disconnecting again still reports closed
    app.disconnect().await;
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Closed);
}

#[tokio::test]
async fn connect_is_idempotent() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    let mut events = app.subscribe();
    only_peer(&platform, ClientRole::App).await;

    app.connect(endpoint(port)).await.unwrap();
    assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    assert_eq!(platform.peers_with_role(ClientRole::App).len(), 1);

    app.disconnect().await;
}

#[tokio::test]
async fn lifecycle_hooks_are_invoked() {
    let (_server, _platform, port) = start_platform(None).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = AppClient::new(credentials("key"), test_options());

    for name in ["pending", "connecting", "connected", "closed"] {
        let seen = seen.clone();
        app.on_lifecycle(name, move |event| seen.lock().push(event.name())).unwrap();
    }

    app.connect(endpoint(port)).await.unwrap();
    app.disconnect().await;

    assert_eq!(*seen.lock(), vec!["pending", "connecting", "connected", "closed"]);
}

#[tokio::test]
async fn unreachable_endpoint_reports_error() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let app = AppClient::new(credentials("key"), test_options());
    let mut events = app.subscribe();

    let Err(err) = app.connect(endpoint(port)).await else {
        panic!("Connect to a closed port succeeded");
    };
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(!app.is_connected());

    assert_eq!(next_event(&mut events).await, LifecycleEvent::Pending);
    assert!(matches!(next_event(&mut events).await, LifecycleEvent::Error(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Request correlation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_fail_fast_when_not_connected() {
    let app = AppClient::new(credentials("key"), test_options());

    let err = app.send_command(Payload::from_json(&json!({ "echo": 1 })).unwrap()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(err.to_string(), "Client is not connected");

    let err = app.generate_auth_token().await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn generate_auth_token_round_trip() {
    let (_server, _platform, port) = start_platform(None).await;
    let app = connected_app(port).await;

    let reply = app.generate_auth_token().await.unwrap();
    assert_eq!(reply.token, "token-app-1");
    assert_eq!(reply.lifetime, 3600);

    app.disconnect().await;
}

#[tokio::test]
async fn tag_commands_report_failure_status_as_protocol_error() {
    let (_server, _platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    let tag = IndexMapping {
        key: "tier".into(),
        value: "gold".into(),
    };

    let added = app
        .add_customer_reminder_by_tag(
            tag.clone(),
            CustomerReminder {
                key: "renewal".into(),
                remind_at: "2026-06-01T09:00:00Z".parse().unwrap(),
                interval_secs: None,
                payload: Some("renew".into()),
            },
        )
        .await
        .unwrap();
    assert!(added.status);
    assert_eq!(added.work_id.as_deref(), Some("work-1"));

    let err = app.cancel_customer_reminder_by_tag(tag, "missing").await.unwrap_err();
    match err {
        ClientError::Protocol(description) => assert_eq!(description, "No such reminder"),
        other => panic!("Expected protocol error, got {other:?}"),
    }

    app.disconnect().await;
}

#[tokio::test]
async fn error_frame_on_request_stream_is_surfaced() {
    let (_server, _platform, port) = start_platform(None).await;
    let app = connected_app(port).await;

    let err = app.send_command(Payload::from_json(&json!({ "fail": true })).unwrap()).await.unwrap_err();
    match err {
        ClientError::Remote(remote) => {
            assert_eq!(remote.error_code(), ErrorCode::Invalid);
            assert_eq!(remote.message, "Rejected by test platform");
        }
        other => panic!("Expected remote error, got {other:?}"),
    }

    // A failed request does not affect the connection
    assert!(app.is_connected());
    app.disconnect().await;
}

#[tokio::test]
async fn concurrent_requests_resolve_with_their_own_replies() {
    let (_server, _platform, port) = start_platform(None).await;
    let app = connected_app(port).await;

    // Later requests are answered first
    let tasks: Vec<_> = (0..10u64)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let reply: Value = app.command(&json!({ "echo": i, "delay_ms": (10 - i) * 20 })).await.unwrap();
                (i, reply)
            })
        })
        .collect();

    for task in tasks {
        let (i, reply) = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(reply["echo"], json!(i));
    }

    app.disconnect().await;
}

#[tokio::test]
async fn simulator_commands_round_trip() {
    let (_server, _platform, port) = start_platform(None).await;
    let sim = SimulatorClient::new(credentials("key"), test_options());
    sim.connect(endpoint(port)).await.unwrap();

    let reply = sim
        .receive_message(
            "+254700000001",
            "sms",
            "21356",
            "sess-1",
            vec![InboundMessageBody::Text("HELLO".into())],
        )
        .await
        .unwrap();
    assert!(reply.status);
    assert_eq!(reply.description, "queued");

    let err = sim.update_payment_status("unknown", "SUCCESS").await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));

    let err = sim.update_payment_status("tx-1", "NOT_A_STATUS").await.unwrap_err();
    assert!(matches!(err, ClientError::Enum(_)));

    sim.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification dispatch
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn received_sms_reaches_handler_and_reply_echoes_app_data() {
    let (_server, platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    let seen = Arc::new(Mutex::new(None));

    app.set_on_received_sms({
        let seen = seen.clone();
        move |notification, customer, app_data, reply| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some((notification, customer, app_data));
                reply.reply(Some(json!({ "body": { "text": "Welcome" } })), None);
                Ok::<(), HandlerError>(())
            }
        }
    });
    app.connect(endpoint(port)).await.unwrap();

    let incoming = DataMapValue::StringVal(r#"{"visits":1}"#.into());
    let peer = only_peer(&platform, ClientRole::App).await;
    let reply = platform
        .push(&peer, customer_notification(received_sms("HELLO"), Some(incoming.clone())))
        .await
        .unwrap();

    let reply: ServerToAppNotificationReply = reply.json().unwrap();
    assert_eq!(reply.message, Some(json!({ "body": { "text": "Welcome" } })));
    assert_eq!(reply.data_update.unwrap().data, incoming);

    let (notification, customer, app_data) = seen.lock().take().unwrap();
    assert_eq!(notification.event, "received_sms");
    assert_eq!(notification.text(), Some("HELLO"));
    assert_eq!(notification.payload["customer_id"], json!("el_cst_123"));
    assert_eq!(notification.payload["channel_number"]["channel"], json!("SMS"));
    assert_eq!(app_data.as_json(), Some(&json!({ "visits": 1 })));

    let customer = customer.unwrap();
    assert_eq!(customer.id(), Some("el_cst_123"));
    assert_eq!(customer.number().unwrap().number, "+254700000001");

    app.disconnect().await;
}

#[tokio::test]
async fn handler_data_update_replaces_app_data() {
    let (_server, platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    app.set_on_received_sms(|_notification, _customer, app_data, reply| async move {
        let visits = app_data.as_json().and_then(|data| data["visits"].as_u64()).unwrap_or(0);
        reply.reply(None, Some(elarian_client::AppData::Json(json!({ "visits": visits + 1 }))));
        Ok::<(), HandlerError>(())
    });
    app.connect(endpoint(port)).await.unwrap();

    let peer = only_peer(&platform, ClientRole::App).await;
    let incoming = DataMapValue::StringVal(r#"{"visits":1}"#.into());
    let reply: ServerToAppNotificationReply = platform
        .push(&peer, customer_notification(received_sms("again"), Some(incoming)))
        .await
        .unwrap()
        .json()
        .unwrap();

    assert!(reply.message.is_none());
    assert_eq!(
        reply.data_update.unwrap().data,
        DataMapValue::StringVal(r#"{"visits":2}"#.into())
    );

    app.disconnect().await;
}

#[tokio::test]
async fn slow_handler_falls_back_to_incoming_app_data() {
    let (_server, platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    let late = Arc::new(Mutex::new(None));

    app.set_on_received_sms({
        let late = late.clone();
        move |_notification, _customer, _app_data, reply| {
            let late = late.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(600)).await;
                let accepted = reply.reply(Some(json!({ "body": { "text": "too late" } })), None);
                *late.lock() = Some(accepted);
                Ok::<(), HandlerError>(())
            }
        }
    });
    app.connect(endpoint(port)).await.unwrap();

    let incoming = DataMapValue::StringVal(r#"{"step":"menu"}"#.into());
    let peer = only_peer(&platform, ClientRole::App).await;
    let reply: ServerToAppNotificationReply = platform
        .push(&peer, customer_notification(received_sms("slow"), Some(incoming.clone())))
        .await
        .unwrap()
        .json()
        .unwrap();

    assert!(reply.message.is_none());
    assert_eq!(reply.data_update.unwrap().data, incoming);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(*late.lock(), Some(false));

    app.disconnect().await;
}

#[tokio::test]
async fn failing_handler_still_gets_timeout_reply() {
    let (_server, platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    app.set_on_received_sms(|_notification, _customer, _app_data, _reply| async move {
        Err::<(), HandlerError>("handler blew up".into())
    });
    app.connect(endpoint(port)).await.unwrap();

    let peer = only_peer(&platform, ClientRole::App).await;
    let reply: ServerToAppNotificationReply = platform
        .push(&peer, customer_notification(received_sms("boom"), None))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(reply, ServerToAppNotificationReply::default());

    app.disconnect().await;
}

#[tokio::test]
async fn unhandled_notification_gets_default_reply() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;

    let incoming = DataMapValue::BytesVal(vec![1, 2, 3]);
    let peer = only_peer(&platform, ClientRole::App).await;
    let entry = json!({ "message_status": { "status": 300, "message_id": "msg-1" } });
    let reply: ServerToAppNotificationReply = platform
        .push(&peer, customer_notification(entry, Some(incoming.clone())))
        .await
        .unwrap()
        .json()
        .unwrap();

    assert!(reply.message.is_none());
    assert_eq!(reply.data_update.unwrap().data, incoming);

    app.disconnect().await;
}

#[tokio::test]
async fn undecodable_notification_is_answered_with_application_error() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    let peer = only_peer(&platform, ClientRole::App).await;

    let err = platform.push(&peer, Payload::new("not json")).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ApplicationError);

    let unknown_channel = json!({ "received_message": {
        "channel_number": { "number": "21356", "channel": 99 },
        "parts": [{ "text": "?" }]
    }});
    let err = platform
        .push(&peer, customer_notification(unknown_channel, None))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ApplicationError);

    // The connection survives dispatch failures
    assert!(app.is_connected());
    assert_eq!(app.generate_auth_token().await.unwrap().token, "token-app-1");

    app.disconnect().await;
}

#[tokio::test]
async fn purse_notification_has_no_customer() {
    let (_server, platform, port) = start_platform(None).await;
    let app = AppClient::new(credentials("key"), test_options());
    let seen = Arc::new(Mutex::new(None));

    app.set_on_payment_status({
        let seen = seen.clone();
        move |notification, customer, _app_data, reply| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some((notification, customer.is_none()));
                reply.reply(None, None);
                Ok::<(), HandlerError>(())
            }
        }
    });
    app.connect(endpoint(port)).await.unwrap();

    let peer = only_peer(&platform, ClientRole::App).await;
    let payload = Payload::from_json(&json!({
        "entry": { "purse": {
            "org_id": "org-1",
            "app_id": "app-1",
            "purse_id": "el_prs_1",
            "created_at": "2026-01-01T00:00:00Z",
            "entry": { "payment_status": { "status": 300, "transaction_id": "tx-9" } }
        }}
    }))
    .unwrap();
    platform.push(&peer, payload).await.unwrap();

    let (notification, no_customer) = seen.lock().take().unwrap();
    assert!(no_customer);
    assert_eq!(notification.payload["purse_id"], json!("el_prs_1"));
    assert_eq!(notification.payload["status"], json!("SUCCESS"));

    app.disconnect().await;
}

#[tokio::test]
async fn simulator_receives_send_message() {
    let (_server, platform, port) = start_platform(None).await;
    let sim = SimulatorClient::new(credentials("key"), test_options());
    let seen = Arc::new(Mutex::new(None));

    sim.set_on_send_message({
        let seen = seen.clone();
        move |notification, customer, _app_data, reply| {
            let seen = seen.clone();
            async move {
                assert!(customer.is_none());
                *seen.lock() = notification.get("message").cloned();
                reply.reply(None, None);
                Ok::<(), HandlerError>(())
            }
        }
    });
    sim.connect(endpoint(port)).await.unwrap();

    let peer = only_peer(&platform, ClientRole::Simulator).await;
    let payload = Payload::from_json(&json!({
        "org_id": "org-1",
        "entry": { "send_message": {
            "customer_number": { "number": "+254700000001", "provider": 2 },
            "channel_number": { "number": "21356", "channel": 1 },
            "message": { "body": { "text": "Hi there" } }
        }}
    }))
    .unwrap();
    let reply: Value = platform.push(&peer, payload).await.unwrap().json().unwrap();

    assert_eq!(reply, json!({}));
    assert_eq!(*seen.lock(), Some(json!({ "body": { "text": "Hi there" } })));

    sim.disconnect().await;
}

#[tokio::test]
async fn registration_outside_vocabulary_fails() {
    let app = AppClient::new(credentials("key"), test_options());
    let err = app
        .on("send_message", |_n, _c, _d, _r| async move { Ok::<(), HandlerError>(()) })
        .err()
        .unwrap();
    match err {
        ClientError::UnexpectedEvent { event, allowed } => {
            assert_eq!(event, "send_message");
            assert!(allowed.contains(&"received_sms"));
            assert!(!allowed.contains(&"send_message"));
        }
        other => panic!("Expected unexpected event, got {other:?}"),
    }

    let sim = SimulatorClient::new(credentials("key"), test_options());
    assert!(sim.on("received_sms", |_n, _c, _d, _r| async move { Ok::<(), HandlerError>(()) }).is_err());
    assert!(sim.on("send_message", |_n, _c, _d, _r| async move { Ok::<(), HandlerError>(()) }).is_ok());
    assert!(sim.on_lifecycle("reminder", |_| {}).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure and recovery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnects_after_connection_is_severed() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    let mut events = app.subscribe();
    assert_eq!(app.reconnect_attempts(), 0);
    only_peer(&platform, ClientRole::App).await;

    platform.sever_all();

    wait_for_event(&mut events, |event| *event == LifecycleEvent::Closed).await;
    wait_for_event(&mut events, |event| *event == LifecycleEvent::Connected).await;

    assert!(app.is_connected());
    assert!(app.reconnect_attempts() >= 1);
    assert_eq!(app.generate_auth_token().await.unwrap().token, "token-app-1");

    app.disconnect().await;
}

#[tokio::test]
async fn manual_reconnect_during_delay_is_not_counted() {
    let (_server, platform, port) = start_platform(None).await;
    let options = ClientOptions {
        reconnect_timeout_ms: 1_000,
        ..test_options()
    };
    let app = AppClient::new(credentials("key"), options);
    app.connect(endpoint(port)).await.unwrap();
    let mut events = app.subscribe();
    only_peer(&platform, ClientRole::App).await;

    platform.sever_all();
    wait_for_event(&mut events, |event| *event == LifecycleEvent::Closed).await;

    app.connect(endpoint(port)).await.unwrap();
    assert!(app.is_connected());

    // Outlast the reconnect delay; the watchdog finds the session alive
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(app.is_connected());
    assert_eq!(app.reconnect_attempts(), 0);

    app.disconnect().await;
}

#[tokio::test]
async fn outstanding_request_fails_when_connection_is_lost() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    only_peer(&platform, ClientRole::App).await;

    let pending = {
        let app = app.clone();
        tokio::spawn(async move { app.send_command(Payload::from_json(&json!({ "echo": 1, "delay_ms": 2_000 })).unwrap()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    platform.sever_all();

    let result = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(ClientError::Transport(TransportError::ConnectionLost))),
        "{result:?}"
    );

    app.disconnect().await;
}

#[tokio::test]
async fn disconnect_fails_outstanding_requests() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    only_peer(&platform, ClientRole::App).await;

    let pending = {
        let app = app.clone();
        tokio::spawn(async move { app.send_command(Payload::from_json(&json!({ "echo": 1, "delay_ms": 2_000 })).unwrap()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.disconnect().await;

    let result = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(ClientError::Transport(TransportError::ConnectionLost))),
        "{result:?}"
    );
    assert!(!app.is_connected());
}

#[tokio::test]
async fn connection_error_frame_emits_error_then_closed() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    let mut events = app.subscribe();

    let peer = only_peer(&platform, ClientRole::App).await;
    assert!(platform.send_connection_error(&peer, RemoteError::connection_error("maintenance")));

    match next_event(&mut events).await {
        LifecycleEvent::Error(message) => assert!(message.contains("maintenance"), "{message}"),
        other => panic!("Expected error, got {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, LifecycleEvent::Closed);
    assert!(!app.is_connected());

    // The liveness loop brings the connection back
    wait_for_event(&mut events, |event| *event == LifecycleEvent::Connected).await;
    assert!(app.is_connected());

    app.disconnect().await;
}

#[tokio::test]
async fn disconnect_stops_reconnection() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    only_peer(&platform, ClientRole::App).await;

    app.disconnect().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!app.is_connected());
    assert_eq!(app.reconnect_attempts(), 0);
    assert_eq!(platform.peers_with_role(ClientRole::App).len(), 0);
}

#[tokio::test]
async fn rejected_api_key_reports_error() {
    let (_server, platform, port) = start_platform(Some("secret")).await;
    let app = AppClient::new(credentials("wrong"), test_options());
    let mut events = app.subscribe();

    let _ = app.connect(endpoint(port)).await;

    let event = wait_for_event(&mut events, |event| matches!(event, LifecycleEvent::Error(_))).await;
    assert!(event == LifecycleEvent::Error("Remote error [0x003]: Invalid api key".into()), "{event:?}");
    assert_eq!(platform.client_count(), 0);

    app.disconnect().await;
}

#[tokio::test]
async fn non_setup_first_frame_is_rejected() {
    let (_server, _platform, port) = start_platform(None).await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/")).await.unwrap();

    ws.send(Message::Binary(Frame::keepalive(true).encode().unwrap())).await.unwrap();

    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for rejection")
        .expect("Stream ended")
        .expect("WebSocket error");
    let Message::Binary(data) = msg else {
        panic!("Expected binary frame, got {msg:?}");
    };
    match Frame::decode(data).unwrap() {
        Frame::Error { stream_id, error } => {
            assert_eq!(stream_id, 0);
            assert_eq!(error.error_code(), ErrorCode::InvalidSetup);
        }
        other => panic!("Expected ERROR, got {other:?}"),
    }
}

#[tokio::test]
async fn health_endpoint_counts_clients() {
    let (_server, platform, port) = start_platform(None).await;
    let app = connected_app(port).await;
    only_peer(&platform, ClientRole::App).await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 1);

    app.disconnect().await;
}
