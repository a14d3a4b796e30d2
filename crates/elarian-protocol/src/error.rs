//! Wire error codes carried by ERROR frames, and codec failures.

use thiserror::Error;

/// Error codes defined for ERROR frames.
///
/// Codes below `0x200` are connection-scoped (sent on stream 0); codes from
/// `0x201` are stream-scoped and answer a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Connection setup
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    RejectedResume,

    // Connection
    ConnectionError,
    ConnectionClose,

    // Stream
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,

    // Custom code
    Custom(u32),
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidSetup => 0x001,
            Self::UnsupportedSetup => 0x002,
            Self::RejectedSetup => 0x003,
            Self::RejectedResume => 0x004,
            Self::ConnectionError => 0x101,
            Self::ConnectionClose => 0x102,
            Self::ApplicationError => 0x201,
            Self::Rejected => 0x202,
            Self::Canceled => 0x203,
            Self::Invalid => 0x204,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0x001 => Self::InvalidSetup,
            0x002 => Self::UnsupportedSetup,
            0x003 => Self::RejectedSetup,
            0x004 => Self::RejectedResume,
            0x101 => Self::ConnectionError,
            0x102 => Self::ConnectionClose,
            0x201 => Self::ApplicationError,
            0x202 => Self::Rejected,
            0x203 => Self::Canceled,
            0x204 => Self::Invalid,
            c => Self::Custom(c),
        }
    }

    /// Whether this code terminates the whole connection rather than one stream.
    pub fn is_connection_level(&self) -> bool {
        self.code() < 0x200
    }
}

/// An error reported by the remote peer in an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: u32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    pub fn invalid_setup(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSetup, message)
    }

    pub fn rejected_setup(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RejectedSetup, message)
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApplicationError, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Remote error [0x{:03X}]: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Failure to decode or encode a binary frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown frame type 0x{0:02X}")]
    UnknownType(u8),

    #[error("stream id {0} exceeds 31 bits")]
    StreamIdOutOfRange(u32),

    #[error("{field} of {len} bytes exceeds its length field")]
    FieldTooLarge { field: &'static str, len: usize },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{frame} frame must use stream 0, got {stream_id}")]
    UnexpectedStream { frame: &'static str, stream_id: u32 },
}
