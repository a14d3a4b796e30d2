//! Connection handshake carried by the SETUP frame.
//!
//! Protocol flow:
//!   1. Client opens `wss://host:port/`
//!   2. Client sends SETUP { keepalive, lifetime, data: AppConnectionMetadata, metadata: ClientAgent }
//!   3. Server accepts silently, or sends ERROR(REJECTED_SETUP) on stream 0 and closes
//!   4. Both sides exchange REQUEST_RESPONSE / PAYLOAD / KEEPALIVE frames

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::frame::{MAJOR_VERSION, Payload, Setup};

/// Credentials and mode flags identifying the connecting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConnectionMetadata {
    pub org_id: String,
    pub app_id: String,
    pub api_key: String,
    /// Set when the client does not accept server-pushed notifications.
    #[serde(default)]
    pub simplex_mode: bool,
    #[serde(default)]
    pub simulator_mode: bool,
}

/// Agent identification sent as SETUP metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAgent {
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClientAgent {
    pub fn rust() -> Self {
        Self {
            agent: "rust".into(),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        }
    }
}

impl AppConnectionMetadata {
    /// Build the SETUP frame body announcing this connection.
    pub fn to_setup(
        &self,
        agent: &ClientAgent,
        keepalive_ms: u32,
        lifetime_ms: u32,
    ) -> Result<Setup, serde_json::Error> {
        let payload = Payload::from_json(self)?.with_metadata(serde_json::to_vec(agent)?);
        Ok(Setup::new(keepalive_ms, lifetime_ms, payload))
    }
}

/// Validate a received SETUP and extract the connection metadata.
///
/// Returns UNSUPPORTED_SETUP for a foreign major version and INVALID_SETUP
/// when the data is not connection metadata.
pub fn parse_setup(setup: &Setup) -> Result<(AppConnectionMetadata, Option<ClientAgent>), RemoteError> {
    if setup.major_version != MAJOR_VERSION {
        return Err(RemoteError::new(
            crate::error::ErrorCode::UnsupportedSetup,
            format!(
                "Unsupported protocol version {}.{}",
                setup.major_version, setup.minor_version
            ),
        ));
    }

    let metadata: AppConnectionMetadata = setup
        .payload
        .json()
        .map_err(|e| RemoteError::invalid_setup(format!("Malformed connection metadata: {e}")))?;

    let agent = setup
        .payload
        .metadata
        .as_ref()
        .and_then(|raw| serde_json::from_slice(raw).ok());

    Ok((metadata, agent))
}
