//! Binary frame codec.
//!
//! Every WebSocket binary message carries exactly one frame:
//!
//! ```text
//! 0               4               6
//! +---------------+-------+-------+---------------------------+
//! | stream id u32 | type6 flags10 | frame body ...            |
//! +---------------+---------------+---------------------------+
//! ```
//!
//! Payload-bearing frames with the METADATA flag prefix their data with a
//! 24-bit metadata length followed by the metadata bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{FrameError, RemoteError};

pub type StreamId = u32;

/// Stream 0 carries connection-scoped frames (SETUP, KEEPALIVE, fatal ERROR).
pub const CONNECTION_STREAM: StreamId = 0;
pub const MAX_STREAM_ID: StreamId = 0x7FFF_FFFF;

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

const HEADER_LEN: usize = 6;
const MAX_METADATA_LEN: usize = 0xFF_FFFF;

/// Frame header flag bits (low 10 bits of the type/flags word).
pub struct Flags;

impl Flags {
    pub const METADATA: u16 = 0x100;
    /// SETUP: a resume token follows the lifetime field.
    pub const RESUME_ENABLE: u16 = 0x80;
    /// KEEPALIVE: the receiver must answer with its own KEEPALIVE.
    pub const RESPOND: u16 = 0x80;
    pub const COMPLETE: u16 = 0x40;
    pub const NEXT: u16 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Setup,
    Keepalive,
    RequestResponse,
    Payload,
    Error,
}

impl FrameType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Setup => 0x01,
            Self::Keepalive => 0x03,
            Self::RequestResponse => 0x04,
            Self::Payload => 0x0A,
            Self::Error => 0x0B,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            0x01 => Ok(Self::Setup),
            0x03 => Ok(Self::Keepalive),
            0x04 => Ok(Self::RequestResponse),
            0x0A => Ok(Self::Payload),
            0x0B => Ok(Self::Error),
            other => Err(FrameError::UnknownType(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Data plus optional metadata, as carried by SETUP, REQUEST_RESPONSE and PAYLOAD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Serialize `value` as the JSON data of a payload without metadata.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Parse the payload data as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    fn encoded_len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, |m| 3 + m.len())
    }
}

/// Body of the SETUP frame, the first frame a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    pub major_version: u16,
    pub minor_version: u16,
    pub keepalive_ms: u32,
    pub lifetime_ms: u32,
    pub resume_token: Option<Bytes>,
    pub metadata_mime: String,
    pub data_mime: String,
    pub payload: Payload,
}

impl Setup {
    pub fn new(keepalive_ms: u32, lifetime_ms: u32, payload: Payload) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            keepalive_ms,
            lifetime_ms,
            resume_token: None,
            metadata_mime: OCTET_STREAM_MIME.into(),
            data_mime: OCTET_STREAM_MIME.into(),
            payload,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Setup(Setup),
    Keepalive {
        respond: bool,
        last_position: u64,
        data: Bytes,
    },
    RequestResponse {
        stream_id: StreamId,
        payload: Payload,
    },
    Payload {
        stream_id: StreamId,
        payload: Payload,
        complete: bool,
    },
    Error {
        stream_id: StreamId,
        error: RemoteError,
    },
}

impl Frame {
    pub fn keepalive(respond: bool) -> Self {
        Self::Keepalive {
            respond,
            last_position: 0,
            data: Bytes::new(),
        }
    }

    /// A complete PAYLOAD answering `stream_id`.
    pub fn reply(stream_id: StreamId, payload: Payload) -> Self {
        Self::Payload {
            stream_id,
            payload,
            complete: true,
        }
    }

    pub fn error(stream_id: StreamId, error: RemoteError) -> Self {
        Self::Error { stream_id, error }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Setup(_) | Self::Keepalive { .. } => CONNECTION_STREAM,
            Self::RequestResponse { stream_id, .. }
            | Self::Payload { stream_id, .. }
            | Self::Error { stream_id, .. } => *stream_id,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup(_) => FrameType::Setup,
            Self::Keepalive { .. } => FrameType::Keepalive,
            Self::RequestResponse { .. } => FrameType::RequestResponse,
            Self::Payload { .. } => FrameType::Payload,
            Self::Error { .. } => FrameType::Error,
        }
    }

    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body_len_hint());

        match self {
            Self::Setup(setup) => {
                let mut flags = metadata_flag(&setup.payload);
                if setup.resume_token.is_some() {
                    flags |= Flags::RESUME_ENABLE;
                }
                put_header(&mut buf, CONNECTION_STREAM, FrameType::Setup, flags)?;
                buf.put_u16(setup.major_version);
                buf.put_u16(setup.minor_version);
                buf.put_u32(setup.keepalive_ms);
                buf.put_u32(setup.lifetime_ms);
                if let Some(token) = &setup.resume_token {
                    let len = u16::try_from(token.len()).map_err(|_| FrameError::FieldTooLarge {
                        field: "resume token",
                        len: token.len(),
                    })?;
                    buf.put_u16(len);
                    buf.put_slice(token);
                }
                put_mime(&mut buf, &setup.metadata_mime, "metadata mime type")?;
                put_mime(&mut buf, &setup.data_mime, "data mime type")?;
                put_payload(&mut buf, &setup.payload)?;
            }
            Self::Keepalive { respond, last_position, data } => {
                let flags = if *respond { Flags::RESPOND } else { 0 };
                put_header(&mut buf, CONNECTION_STREAM, FrameType::Keepalive, flags)?;
                buf.put_u64(*last_position);
                buf.put_slice(data);
            }
            Self::RequestResponse { stream_id, payload } => {
                put_header(&mut buf, *stream_id, FrameType::RequestResponse, metadata_flag(payload))?;
                put_payload(&mut buf, payload)?;
            }
            Self::Payload { stream_id, payload, complete } => {
                let mut flags = metadata_flag(payload) | Flags::NEXT;
                if *complete {
                    flags |= Flags::COMPLETE;
                }
                put_header(&mut buf, *stream_id, FrameType::Payload, flags)?;
                put_payload(&mut buf, payload)?;
            }
            Self::Error { stream_id, error } => {
                put_header(&mut buf, *stream_id, FrameType::Error, 0)?;
                buf.put_u32(error.code);
                buf.put_slice(error.message.as_bytes());
            }
        }

        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        need(&buf, HEADER_LEN)?;
        let stream_id = buf.get_u32() & MAX_STREAM_ID;
        let type_and_flags = buf.get_u16();
        let frame_type = FrameType::from_code((type_and_flags >> 10) as u8)?;
        let flags = type_and_flags & 0x03FF;

        match frame_type {
            FrameType::Setup => {
                expect_connection_stream(frame_type, stream_id)?;
                need(&buf, 12)?;
                let major_version = buf.get_u16();
                let minor_version = buf.get_u16();
                let keepalive_ms = buf.get_u32();
                let lifetime_ms = buf.get_u32();
                let resume_token = if flags & Flags::RESUME_ENABLE != 0 {
                    need(&buf, 2)?;
                    let len = buf.get_u16() as usize;
                    need(&buf, len)?;
                    Some(buf.split_to(len))
                } else {
                    None
                };
                let metadata_mime = take_mime(&mut buf, "metadata mime type")?;
                let data_mime = take_mime(&mut buf, "data mime type")?;
                let payload = take_payload(buf, flags)?;
                Ok(Self::Setup(Setup {
                    major_version,
                    minor_version,
                    keepalive_ms,
                    lifetime_ms,
                    resume_token,
                    metadata_mime,
                    data_mime,
                    payload,
                }))
            }
            FrameType::Keepalive => {
                expect_connection_stream(frame_type, stream_id)?;
                need(&buf, 8)?;
                let last_position = buf.get_u64();
                Ok(Self::Keepalive {
                    respond: flags & Flags::RESPOND != 0,
                    last_position,
                    data: buf,
                })
            }
            FrameType::RequestResponse => Ok(Self::RequestResponse {
                stream_id,
                payload: take_payload(buf, flags)?,
            }),
            FrameType::Payload => Ok(Self::Payload {
                stream_id,
                payload: take_payload(buf, flags)?,
                complete: flags & Flags::COMPLETE != 0,
            }),
            FrameType::Error => {
                need(&buf, 4)?;
                let code = buf.get_u32();
                let message = String::from_utf8(buf.to_vec())
                    .map_err(|_| FrameError::InvalidUtf8 { field: "error message" })?;
                Ok(Self::Error {
                    stream_id,
                    error: RemoteError { code, message },
                })
            }
        }
    }

    fn body_len_hint(&self) -> usize {
        match self {
            Self::Setup(setup) => 14 + setup.payload.encoded_len() + 2 * OCTET_STREAM_MIME.len(),
            Self::Keepalive { data, .. } => 8 + data.len(),
            Self::RequestResponse { payload, .. } | Self::Payload { payload, .. } => payload.encoded_len(),
            Self::Error { error, .. } => 4 + error.message.len(),
        }
    }
}

// ── Encoding helpers ─────────────────────────────────────────────────────────

fn metadata_flag(payload: &Payload) -> u16 {
    if payload.metadata.is_some() { Flags::METADATA } else { 0 }
}

fn put_header(
    buf: &mut BytesMut,
    stream_id: StreamId,
    frame_type: FrameType,
    flags: u16,
) -> Result<(), FrameError> {
    if stream_id > MAX_STREAM_ID {
        return Err(FrameError::StreamIdOutOfRange(stream_id));
    }
    buf.put_u32(stream_id);
    buf.put_u16(((frame_type.code() as u16) << 10) | (flags & 0x03FF));
    Ok(())
}

fn put_mime(buf: &mut BytesMut, mime: &str, field: &'static str) -> Result<(), FrameError> {
    let len = u8::try_from(mime.len()).map_err(|_| FrameError::FieldTooLarge { field, len: mime.len() })?;
    buf.put_u8(len);
    buf.put_slice(mime.as_bytes());
    Ok(())
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) -> Result<(), FrameError> {
    if let Some(metadata) = &payload.metadata {
        let len = metadata.len();
        if len > MAX_METADATA_LEN {
            return Err(FrameError::FieldTooLarge { field: "metadata", len });
        }
        buf.put_u8((len >> 16) as u8);
        buf.put_u16(len as u16);
        buf.put_slice(metadata);
    }
    buf.put_slice(&payload.data);
    Ok(())
}

// ── Decoding helpers ─────────────────────────────────────────────────────────

fn need(buf: &Bytes, needed: usize) -> Result<(), FrameError> {
    if buf.remaining() < needed {
        return Err(FrameError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn expect_connection_stream(frame_type: FrameType, stream_id: StreamId) -> Result<(), FrameError> {
    if stream_id != CONNECTION_STREAM {
        return Err(FrameError::UnexpectedStream {
            frame: frame_type.name(),
            stream_id,
        });
    }
    Ok(())
}

fn take_mime(buf: &mut Bytes, field: &'static str) -> Result<String, FrameError> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8 { field })
}

fn take_payload(mut buf: Bytes, flags: u16) -> Result<Payload, FrameError> {
    let metadata = if flags & Flags::METADATA != 0 {
        need(&buf, 3)?;
        let len = ((buf.get_u8() as usize) << 16) | buf.get_u16() as usize;
        need(&buf, len)?;
        Some(buf.split_to(len))
    } else {
        None
    };
    Ok(Payload { data: buf, metadata })
}
