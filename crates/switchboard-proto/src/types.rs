//! Packet type codes and result codes.

use crate::field::{MESSAGE_FIELD_LEN, NAME_FIELD_LEN};
use crate::header::HEADER_SIZE;
use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};
use std::fmt;

const RESULT_LEN: usize = 2;

/// Packet type codes carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Client asks to authenticate
    LoginRequest = 2001,
    /// Server answers a login attempt
    LoginResponse = 2002,
    /// Client sends chat text to everyone
    BroadcastRequest = 3001,
    /// Server relays chat text from one user
    BroadcastResponse = 3002,
    /// Client sends chat text to one user
    WhisperRequest = 3005,
    /// Server delivers a private message, or reports a missing receiver
    WhisperResponse = 3006,
    /// Server announces a newly authenticated user
    UserJoinNotify = 5001,
    /// Server announces that an authenticated user left
    UserLeaveNotify = 5002,
}

impl PacketType {
    /// All registered packet types.
    pub const ALL: [Self; 8] = [
        Self::LoginRequest,
        Self::LoginResponse,
        Self::BroadcastRequest,
        Self::BroadcastResponse,
        Self::WhisperRequest,
        Self::WhisperResponse,
        Self::UserJoinNotify,
        Self::UserLeaveNotify,
    ];

    /// Look up a type by its wire code.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            2001 => Some(Self::LoginRequest),
            2002 => Some(Self::LoginResponse),
            3001 => Some(Self::BroadcastRequest),
            3002 => Some(Self::BroadcastResponse),
            3005 => Some(Self::WhisperRequest),
            3006 => Some(Self::WhisperResponse),
            5001 => Some(Self::UserJoinNotify),
            5002 => Some(Self::UserLeaveNotify),
            _ => None,
        }
    }

    /// Wire code of this type.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Exact size in bytes, header included, of every packet of this type.
    pub const fn wire_size(self) -> usize {
        HEADER_SIZE
            + match self {
                Self::LoginRequest => 3 * NAME_FIELD_LEN,
                Self::LoginResponse => RESULT_LEN,
                Self::BroadcastRequest => MESSAGE_FIELD_LEN,
                Self::BroadcastResponse | Self::WhisperRequest => {
                    NAME_FIELD_LEN + MESSAGE_FIELD_LEN
                }
                Self::WhisperResponse => RESULT_LEN + NAME_FIELD_LEN + MESSAGE_FIELD_LEN,
                Self::UserJoinNotify | Self::UserLeaveNotify => NAME_FIELD_LEN,
            }
    }

    /// Type name for logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::LoginRequest => "LoginRequest",
            Self::LoginResponse => "LoginResponse",
            Self::BroadcastRequest => "BroadcastRequest",
            Self::BroadcastResponse => "BroadcastResponse",
            Self::WhisperRequest => "WhisperRequest",
            Self::WhisperResponse => "WhisperResponse",
            Self::UserJoinNotify => "UserJoinNotify",
            Self::UserLeaveNotify => "UserLeaveNotify",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome codes carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResultCode {
    /// Request succeeded
    Success = 0,
    /// Request fields were unusable
    InvalidPacket = 1001,
    /// Password did not match
    AuthFailed = 1002,
    /// Username is already authenticated, or this connection already is
    AlreadyLoggedIn = 1003,
    /// No session slot is available
    ServerFull = 1004,
    /// Unknown user id at login, or missing whisper receiver
    UserNotFound = 1005,
    /// Operation not permitted in the current state
    PermissionDenied = 1009,
    /// Backing store failed
    ServerError = 9999,
}

impl ResultCode {
    /// Look up a result by its wire code.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1001 => Some(Self::InvalidPacket),
            1002 => Some(Self::AuthFailed),
            1003 => Some(Self::AlreadyLoggedIn),
            1004 => Some(Self::ServerFull),
            1005 => Some(Self::UserNotFound),
            1009 => Some(Self::PermissionDenied),
            9999 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Wire code of this result.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether this is [`ResultCode::Success`].
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

impl BinRead for ResultCode {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let code = u16::read_options(reader, endian, ())?;
        Self::from_code(code).ok_or_else(|| binrw::Error::Custom {
            pos,
            err: Box::new(crate::error::DecodeError::UnknownResult(code)),
        })
    }
}

impl BinWrite for ResultCode {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.code().write_options(writer, endian, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes() {
        assert_eq!(PacketType::LoginRequest.wire_size(), 103);
        assert_eq!(PacketType::LoginResponse.wire_size(), 6);
        assert_eq!(PacketType::BroadcastRequest.wire_size(), 1029);
        assert_eq!(PacketType::BroadcastResponse.wire_size(), 1062);
        assert_eq!(PacketType::WhisperRequest.wire_size(), 1062);
        assert_eq!(PacketType::WhisperResponse.wire_size(), 1064);
        assert_eq!(PacketType::UserJoinNotify.wire_size(), 37);
        assert_eq!(PacketType::UserLeaveNotify.wire_size(), 37);
    }

    #[test]
    fn test_codes_are_stable() {
        for kind in PacketType::ALL {
            assert_eq!(PacketType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(PacketType::from_code(4001), None);

        assert_eq!(ResultCode::Success.code(), 0);
        assert_eq!(ResultCode::UserNotFound.code(), 1005);
        assert_eq!(ResultCode::from_code(9999), Some(ResultCode::ServerError));
        assert_eq!(ResultCode::from_code(42), None);
    }
}
