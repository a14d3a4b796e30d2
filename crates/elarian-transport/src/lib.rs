//! Elarian Transport Layer
//!
//! Moves frames over a WebSocket in both directions:
//! - `session`: the client side. Dials the platform, sends SETUP, keeps the
//!   connection alive, correlates requests with replies, and answers
//!   server-initiated requests through the `InboundHandler` trait.
//! - `server`: a loopback platform that plays the server side for tests and
//!   local development, decoupled from business logic via `CommandHandler`.

pub mod connection;
pub mod error;
pub mod server;
pub mod session;

pub use connection::PeerInfo;
pub use error::TransportError;
pub use server::{CommandContext, CommandHandler, PlatformConfig, PlatformHandle, PlatformServer};
pub use session::{InboundHandler, SessionEvent, SessionOptions, TransportSession, WsStream, dial};
