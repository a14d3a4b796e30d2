//! elarian-link — command-line client for the Elarian platform.
//!
//! Usage:
//!   elarian-link listen --org-id ORG --app-id APP --api-key KEY
//!   elarian-link simulate --from +254700000000 --channel-number 21356 --text HELLO
//!   elarian-link sandbox --port 8443
//!
//! Credentials may also come from ELARIAN_ORG_ID, ELARIAN_APP_ID and
//! ELARIAN_API_KEY. `sandbox` runs a local platform; point the other
//! commands at it with `--host 127.0.0.1 --port 8443 --no-tls`.

mod sandbox;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use elarian_client::config::{DEFAULT_HOST, DEFAULT_PORT};
use elarian_client::{
    AppClient, ClientOptions, Credentials, Endpoint, HandlerError, LifecycleEvent, SimulatorClient,
};
use elarian_protocol::Events;
use elarian_protocol::events::APP_EVENTS;
use elarian_protocol::notification::InboundMessageBody;
use elarian_transport::{PlatformConfig, PlatformServer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::sandbox::SandboxHandler;

#[derive(Parser, Debug)]
#[command(name = "elarian-link", version, about = "Elarian platform client")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.elarian/logs/elarian-link.log if no path given)
    #[arg(long, global = true, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect as an app and log every notification
    Listen(ConnectArgs),

    /// Connect as a simulator and deliver one inbound message
    Simulate {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Customer number the message comes from
        #[arg(long)]
        from: String,

        /// Messaging channel name
        #[arg(long, default_value = "SMS")]
        channel: String,

        /// App channel number the message is sent to
        #[arg(long)]
        channel_number: String,

        #[arg(long)]
        text: String,

        /// Messaging session id (random if not provided)
        #[arg(long)]
        session_id: Option<String>,

        /// How long to wait for the app's response message
        #[arg(long, default_value = "2000")]
        wait_ms: u64,
    },

    /// Run a local platform for development
    Sandbox {
        /// Port to listen on (0 for OS-assigned)
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Hostname to bind to
        #[arg(long, default_value = "127.0.0.1")]
        hostname: String,

        /// Only accept clients presenting this api key
        #[arg(long)]
        api_key: Option<String>,

        /// Maximum concurrent connections
        #[arg(long, default_value = "64")]
        max_connections: usize,
    },
}

#[derive(Args, Debug)]
struct ConnectArgs {
    #[arg(long, env = "ELARIAN_ORG_ID")]
    org_id: String,

    #[arg(long, env = "ELARIAN_APP_ID")]
    app_id: String,

    #[arg(long, env = "ELARIAN_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect over plain WebSocket (local endpoints only)
    #[arg(long)]
    no_tls: bool,

    /// JSON file with client options
    #[arg(long)]
    options: Option<PathBuf>,
}

impl ConnectArgs {
    fn credentials(&self) -> Credentials {
        Credentials::new(&self.org_id, &self.app_id, &self.api_key)
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            tls: !self.no_tls,
        }
    }

    fn client_options(&self) -> anyhow::Result<ClientOptions> {
        match &self.options {
            Some(path) => load_options(path),
            None => Ok(ClientOptions::default()),
        }
    }
}

fn load_options(path: &Path) -> anyhow::Result<ClientOptions> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid options file {}", path.display()))
}

fn init_tracing(verbose: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".elarian/logs/elarian-link.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

fn log_lifecycle(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Error(message) => warn!("Connection error: {message}"),
        other => info!("Connection {}", other.name()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Listen(args) => listen(args).await,
        Command::Simulate {
            connect,
            from,
            channel,
            channel_number,
            text,
            session_id,
            wait_ms,
        } => {
            let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let message = vec![InboundMessageBody::Text(text)];
            simulate(connect, &from, &channel, &channel_number, session_id, message, wait_ms).await
        }
        Command::Sandbox {
            port,
            hostname,
            api_key,
            max_connections,
        } => {
            let config = PlatformConfig {
                port,
                hostname,
                api_key,
                max_connections: Some(max_connections),
                ..PlatformConfig::default()
            };
            sandbox(config).await
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn listen(args: ConnectArgs) -> anyhow::Result<()> {
    let client = AppClient::new(args.credentials(), args.client_options()?);

    for event in APP_EVENTS {
        client.on(event, |notification, customer, app_data, reply| async move {
            let customer = customer.as_ref().and_then(|c| c.id()).unwrap_or("-");
            info!("{} for {customer}: {}", notification.event, notification.payload);
            info!("  app data: {app_data:?}");
            reply.reply(None, None);
            Ok::<(), HandlerError>(())
        })?;
    }
    for event in [Events::PENDING, Events::CONNECTING, Events::CONNECTED, Events::ERROR, Events::CLOSED] {
        client.on_lifecycle(event, log_lifecycle)?;
    }

    client
        .connect(args.endpoint())
        .await
        .with_context(|| format!("Failed to connect to {}", args.endpoint().url()))?;

    println!("Listening for notifications. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    client.disconnect().await;
    Ok(())
}

async fn simulate(
    args: ConnectArgs,
    from: &str,
    channel: &str,
    channel_number: &str,
    session_id: String,
    parts: Vec<InboundMessageBody>,
    wait_ms: u64,
) -> anyhow::Result<()> {
    let client = SimulatorClient::new(args.credentials(), args.client_options()?);
    client.set_on_send_message(|notification, _customer, _app_data, reply| async move {
        match notification.get("message") {
            Some(message) => println!("App replied: {message}"),
            None => println!("App sent: {}", notification.payload),
        }
        reply.reply(None, None);
        Ok::<(), HandlerError>(())
    });
    client.set_on_error(log_lifecycle);

    client
        .connect(args.endpoint())
        .await
        .with_context(|| format!("Failed to connect to {}", args.endpoint().url()))?;

    let reply = client
        .receive_message(from, channel, channel_number, session_id, parts)
        .await
        .context("Platform rejected the message")?;
    println!("{}", reply.description);

    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    client.disconnect().await;
    Ok(())
}

async fn sandbox(config: PlatformConfig) -> anyhow::Result<()> {
    let mut server = PlatformServer::start(config, SandboxHandler::default())
        .await
        .context("Failed to start sandbox platform")?;

    println!();
    println!("  Elarian sandbox platform");
    println!();
    println!("  WebSocket endpoint:");
    println!("    ws://{}:{}/", server.hostname(), server.port());
    println!("  Health:");
    println!("    http://{}:{}/health", server.hostname(), server.port());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c().await?;

    println!("  Shutting down...");
    server.stop().await;
    Ok(())
}
