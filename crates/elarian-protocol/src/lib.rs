//! Elarian wire protocol types.
//!
//! Binary frame codec, handshake metadata, event vocabularies, enum
//! families, and the JSON message schemas exchanged with the platform.
//! This crate is the single source of truth for names and codes shared by
//! the transport, the client, and the loopback platform.

pub mod command;
pub mod enums;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod notification;

pub use enums::{EnumError, EnumFamily};
pub use error::{ErrorCode, FrameError, RemoteError};
pub use events::{ClientRole, EventName, Events};
pub use frame::{Frame, FrameType, Payload, Setup, StreamId};
pub use handshake::{AppConnectionMetadata, ClientAgent};
pub use notification::{
    DataMapValue, NotificationBody, ServerToAppNotification, ServerToAppNotificationReply,
    ServerToSimulatorNotification, ServerToSimulatorNotificationReply,
};
