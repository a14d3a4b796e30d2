use std::time::Duration;

use elarian_protocol::{FrameError, RemoteError, StreamId};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Nothing received from the peer for {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("Reply on stream {0} matches no pending request")]
    UnmatchedReply(StreamId),

    #[error("Unexpected {0} frame from peer")]
    UnexpectedFrame(&'static str),

    #[error("Connection lost before a reply arrived")]
    ConnectionLost,

    #[error("Session is closed")]
    Closed,
}
