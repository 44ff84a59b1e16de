//! Framing header.
//!
//! Every packet starts with a 4-byte little-endian header:
//! - Packet type code (2 bytes)
//! - Total packet size including the header (2 bytes)

use crate::types::PacketType;
use binrw::{BinRead, BinWrite};

/// Size of the framing header in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest packet a peer may declare; anything larger tears the connection down
pub const MAX_PACKET_SIZE: usize = 2048;

/// Packet framing header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct PacketHeader {
    /// Packet type code
    pub kind: u16,

    /// Total size of the packet, header included
    pub size: u16,
}

impl PacketHeader {
    /// Header for a packet of `kind` with its registered size.
    pub const fn for_type(kind: PacketType) -> Self {
        Self {
            kind: kind.code(),
            size: kind.wire_size() as u16,
        }
    }

    /// Parse a header from the first bytes of the stream.
    pub const fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            kind: u16::from_le_bytes([bytes[0], bytes[1]]),
            size: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Wire representation of the header.
    pub const fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let kind = self.kind.to_le_bytes();
        let size = self.size.to_le_bytes();
        [kind[0], kind[1], size[0], size[1]]
    }

    /// Registered packet type, if the code is known.
    pub const fn packet_type(self) -> Option<PacketType> {
        PacketType::from_code(self.kind)
    }

    /// Declared total size as `usize`.
    pub const fn total_size(self) -> usize {
        self.size as usize
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::io::Cursor;

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = PacketHeader::for_type(PacketType::LoginRequest);
        // 2001 = 0x07D1, 103 = 0x0067
        assert_eq!(header.to_bytes(), [0xD1, 0x07, 0x67, 0x00]);
        assert_eq!(PacketHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_header_binrw_matches_manual_layout() {
        let header = PacketHeader {
            kind: 3006,
            size: 1064,
        };
        let mut cursor = Cursor::new(Vec::new());
        header.write(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().as_slice(), header.to_bytes().as_slice());

        cursor.set_position(0);
        assert_eq!(PacketHeader::read(&mut cursor).unwrap(), header);
    }

    #[test]
    fn test_unknown_type_code() {
        let header = PacketHeader::from_bytes(&[0x39, 0x05, 0x04, 0x00]);
        assert_eq!(header.kind, 1337);
        assert_eq!(header.packet_type(), None);
        assert_eq!(header.total_size(), 4);
    }
}
