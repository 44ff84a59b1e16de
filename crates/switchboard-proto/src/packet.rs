//! Packet bodies and the packet sum type.
//!
//! Bodies are packed little-endian structures of fixed-width fields, so each
//! packet type has exactly one legal wire size (see
//! [`PacketType::wire_size`]). Decoding checks the declared size against it
//! before reading any field.

use crate::error::{DecodeError, EncodeError};
use crate::field::{MessageField, NameField};
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::types::{PacketType, ResultCode};
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

/// Login attempt.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LoginRequest {
    /// Account identifier used for the credential lookup
    pub user_id: NameField,
    /// Plain-text password
    pub password: NameField,
    /// Display name to register for the session
    pub username: NameField,
}

/// Login outcome.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LoginResponse {
    /// Result of the attempt
    pub result: ResultCode,
}

/// Chat text for every other user.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BroadcastRequest {
    /// Chat text
    pub message: MessageField,
}

/// Relayed chat text.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BroadcastResponse {
    /// Username of the author
    pub user: NameField,
    /// Chat text
    pub message: MessageField,
}

/// Private chat text for one user.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct WhisperRequest {
    /// Username of the receiver
    pub receiver: NameField,
    /// Chat text
    pub message: MessageField,
}

/// Delivered private message, or a missing-receiver report to the author.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct WhisperResponse {
    /// `Success` on delivery, `UserNotFound` when reporting back
    pub result: ResultCode,
    /// Username of the author (empty on a report)
    pub sender: NameField,
    /// Chat text, or the report text
    pub message: MessageField,
}

/// A user finished logging in.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct UserJoinNotify {
    /// Username that joined
    pub user: NameField,
}

/// An authenticated user disconnected.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct UserLeaveNotify {
    /// Username that left
    pub user: NameField,
}

/// Any packet of the protocol, keyed by its type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// See [`LoginRequest`]
    LoginRequest(LoginRequest),
    /// See [`LoginResponse`]
    LoginResponse(LoginResponse),
    /// See [`BroadcastRequest`]
    BroadcastRequest(BroadcastRequest),
    /// See [`BroadcastResponse`]
    BroadcastResponse(BroadcastResponse),
    /// See [`WhisperRequest`]
    WhisperRequest(WhisperRequest),
    /// See [`WhisperResponse`]
    WhisperResponse(WhisperResponse),
    /// See [`UserJoinNotify`]
    UserJoinNotify(UserJoinNotify),
    /// See [`UserLeaveNotify`]
    UserLeaveNotify(UserLeaveNotify),
}

macro_rules! impl_from_body {
    ($($body:ident),* $(,)?) => {
        $(
            impl From<$body> for Packet {
                fn from(body: $body) -> Self {
                    Self::$body(body)
                }
            }
        )*
    };
}

impl_from_body!(
    LoginRequest,
    LoginResponse,
    BroadcastRequest,
    BroadcastResponse,
    WhisperRequest,
    WhisperResponse,
    UserJoinNotify,
    UserLeaveNotify,
);

impl Packet {
    /// Type code of this packet.
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::LoginRequest(_) => PacketType::LoginRequest,
            Self::LoginResponse(_) => PacketType::LoginResponse,
            Self::BroadcastRequest(_) => PacketType::BroadcastRequest,
            Self::BroadcastResponse(_) => PacketType::BroadcastResponse,
            Self::WhisperRequest(_) => PacketType::WhisperRequest,
            Self::WhisperResponse(_) => PacketType::WhisperResponse,
            Self::UserJoinNotify(_) => PacketType::UserJoinNotify,
            Self::UserLeaveNotify(_) => PacketType::UserLeaveNotify,
        }
    }

    /// Serialize header and body.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let kind = self.packet_type();
        let mut cursor = Cursor::new(Vec::with_capacity(kind.wire_size()));
        PacketHeader::for_type(kind).write(&mut cursor)?;

        match self {
            Self::LoginRequest(body) => body.write(&mut cursor)?,
            Self::LoginResponse(body) => body.write(&mut cursor)?,
            Self::BroadcastRequest(body) => body.write(&mut cursor)?,
            Self::BroadcastResponse(body) => body.write(&mut cursor)?,
            Self::WhisperRequest(body) => body.write(&mut cursor)?,
            Self::WhisperResponse(body) => body.write(&mut cursor)?,
            Self::UserJoinNotify(body) => body.write(&mut cursor)?,
            Self::UserLeaveNotify(body) => body.write(&mut cursor)?,
        }

        Ok(cursor.into_inner())
    }

    /// Decode one complete packet from the start of `bytes`.
    ///
    /// The header's declared size must equal the registered size for its
    /// type. Bytes past that size are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some(raw_header) = bytes.first_chunk::<HEADER_SIZE>() else {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        };
        let header = PacketHeader::from_bytes(raw_header);

        let kind = header
            .packet_type()
            .ok_or(DecodeError::UnknownType { code: header.kind })?;
        let expected = kind.wire_size();
        if header.total_size() != expected {
            return Err(DecodeError::SizeMismatch {
                kind: kind.name(),
                expected,
                actual: header.total_size(),
            });
        }
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                needed: expected,
                available: bytes.len(),
            });
        }

        let mut cursor = Cursor::new(&bytes[HEADER_SIZE..expected]);
        let packet = match kind {
            PacketType::LoginRequest => Self::LoginRequest(LoginRequest::read(&mut cursor)?),
            PacketType::LoginResponse => Self::LoginResponse(LoginResponse::read(&mut cursor)?),
            PacketType::BroadcastRequest => {
                Self::BroadcastRequest(BroadcastRequest::read(&mut cursor)?)
            }
            PacketType::BroadcastResponse => {
                Self::BroadcastResponse(BroadcastResponse::read(&mut cursor)?)
            }
            PacketType::WhisperRequest => {
                Self::WhisperRequest(WhisperRequest::read(&mut cursor)?)
            }
            PacketType::WhisperResponse => {
                Self::WhisperResponse(WhisperResponse::read(&mut cursor)?)
            }
            PacketType::UserJoinNotify => {
                Self::UserJoinNotify(UserJoinNotify::read(&mut cursor)?)
            }
            PacketType::UserLeaveNotify => {
                Self::UserLeaveNotify(UserLeaveNotify::read(&mut cursor)?)
            }
        };

        Ok(packet)
    }

    /// Build a login request, rejecting fields that do not fit.
    pub fn login_request(
        user_id: &str,
        password: &str,
        username: &str,
    ) -> Result<Self, EncodeError> {
        Ok(Self::LoginRequest(LoginRequest {
            user_id: NameField::new(user_id)?,
            password: NameField::new(password)?,
            username: NameField::new(username)?,
        }))
    }

    /// Build a broadcast request, rejecting text that does not fit.
    pub fn broadcast_request(message: &str) -> Result<Self, EncodeError> {
        Ok(Self::BroadcastRequest(BroadcastRequest {
            message: MessageField::new(message)?,
        }))
    }

    /// Build a whisper request, rejecting fields that do not fit.
    pub fn whisper_request(receiver: &str, message: &str) -> Result<Self, EncodeError> {
        Ok(Self::WhisperRequest(WhisperRequest {
            receiver: NameField::new(receiver)?,
            message: MessageField::new(message)?,
        }))
    }
}
