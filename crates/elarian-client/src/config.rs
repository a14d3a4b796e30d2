//! Client configuration: endpoint, credentials, and connection options.

use std::time::Duration;

use elarian_transport::SessionOptions;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "tcp.elarian.com";
pub const DEFAULT_PORT: u16 = 443;

/// Where the platform lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Use `wss://`; disable only for loopback endpoints
    pub tls: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: true,
        }
    }

    /// A plaintext endpoint, e.g. a local sandbox.
    pub fn insecure(host: impl Into<String>, port: u16) -> Self {
        Self {
            tls: false,
            ..Self::new(host, port)
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// Organization and app identity plus the api key.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub org_id: String,
    pub app_id: String,
    api_key: SecretString,
}

impl Credentials {
    pub fn new(org_id: impl Into<String>, app_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            app_id: app_id.into(),
            api_key: SecretString::from(api_key.into()),
        }
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Connection options. Every field has a default, so a config file only
/// needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Ask the platform for a resumable session
    pub resumable: bool,
    /// Maximum silence from the platform before the session fails
    pub lifetime_ms: u64,
    /// Interval between keepalive frames
    pub keep_alive_ms: u64,
    /// Accept server-pushed notifications
    pub allow_notifications: bool,
    /// Fixed delay before each reconnect attempt
    pub reconnect_timeout_ms: u64,
    /// How often the liveness loop checks the transport
    pub liveness_interval_ms: u64,
    /// How long a notification handler has to reply
    pub reply_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            resumable: false,
            lifetime_ms: 60_000,
            keep_alive_ms: 1_000,
            allow_notifications: true,
            reconnect_timeout_ms: 60_000,
            liveness_interval_ms: 2_000,
            reply_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientOptions {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            keepalive: Duration::from_millis(self.keep_alive_ms),
            lifetime: Duration::from_millis(self.lifetime_ms),
        }
    }
}
