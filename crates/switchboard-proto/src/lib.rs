//! Wire format for the switchboard chat protocol.
//!
//! Packets are length-prefixed and packed little-endian:
//!
//! ```text
//! +-----------+-----------+------------------------------+
//! | type: u16 | size: u16 | fixed-width body             |
//! +-----------+-----------+------------------------------+
//! ```
//!
//! `size` counts the header too. Because every body is made of fixed-width
//! fields, each packet type has exactly one legal size, which receivers use
//! as an integrity check before touching any field.
//!
//! # Example
//!
//! ```
//! use switchboard_proto::{Packet, PacketType};
//!
//! let bytes = Packet::whisper_request("bob", "hi there")?.encode()?;
//! assert_eq!(bytes.len(), PacketType::WhisperRequest.wire_size());
//!
//! let decoded = Packet::decode(&bytes)?;
//! assert_eq!(decoded.packet_type(), PacketType::WhisperRequest);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod field;
pub mod header;
pub mod packet;
pub mod types;

pub use error::{DecodeError, EncodeError};
pub use field::{
    FixedStr, MAX_MESSAGE_LEN, MAX_NAME_LEN, MESSAGE_FIELD_LEN, MessageField, NAME_FIELD_LEN,
    NameField,
};
pub use header::{HEADER_SIZE, MAX_PACKET_SIZE, PacketHeader};
pub use packet::{
    BroadcastRequest, BroadcastResponse, LoginRequest, LoginResponse, Packet, UserJoinNotify,
    UserLeaveNotify, WhisperRequest, WhisperResponse,
};
pub use types::{PacketType, ResultCode};
