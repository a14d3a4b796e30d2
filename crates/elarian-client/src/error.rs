use elarian_protocol::{EnumError, RemoteError};
use elarian_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client is not connected")]
    NotConnected,

    #[error("Unexpected event {event}. Must be one of {allowed:?}")]
    UnexpectedEvent {
        event: String,
        allowed: Vec<&'static str>,
    },

    #[error("Either id or number is required")]
    MissingIdentity,

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error(transparent)]
    Transport(TransportError),

    /// The platform answered a request with an ERROR frame.
    #[error(transparent)]
    Remote(RemoteError),

    /// The platform answered, but reported a failure.
    #[error("{0}")]
    Protocol(String),

    #[error("Failed to encode or decode a message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Enum(#[from] EnumError),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Remote(remote) => Self::Remote(remote),
            other => Self::Transport(other),
        }
    }
}

/// Why an inbound notification could not be dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Malformed notification: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Enum(#[from] EnumError),

    #[error("Notification {event} is missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("Malformed app data: {0}")]
    AppData(#[source] serde_json::Error),

    #[error("Failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Reply channel closed before a reply was produced")]
    ReplyDropped,
}
