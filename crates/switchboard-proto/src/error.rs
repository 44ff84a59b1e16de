//! Error types for packet encoding and decoding.

use thiserror::Error;

/// Errors raised while decoding a packet from its wire bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer bytes were supplied than the header or body needs
    #[error("Truncated packet: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes supplied
        available: usize,
    },

    /// Header carries a type code with no registered packet
    #[error("Unknown packet type: {code}")]
    UnknownType {
        /// Raw type code from the header
        code: u16,
    },

    /// Declared size differs from the fixed size registered for the type
    #[error("Size mismatch for {kind}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Packet type name
        kind: &'static str,
        /// Registered wire size
        expected: usize,
        /// Declared or supplied size
        actual: usize,
    },

    /// Result code field holds a value outside the known enumeration
    #[error("Unknown result code: {0}")]
    UnknownResult(u16),

    /// Body bytes could not be parsed
    #[error("Malformed packet body: {0}")]
    Malformed(#[from] binrw::Error),
}

/// Errors raised while building a packet.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Text does not fit into its fixed-width field
    #[error("Field too long: {len} bytes exceeds maximum of {max}")]
    FieldTooLong {
        /// Length of the rejected text in bytes
        len: usize,
        /// Maximum text length for the field
        max: usize,
    },

    /// Serializer failure
    #[error("Failed to write packet: {0}")]
    Write(#[from] binrw::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_messages() {
        let err = DecodeError::SizeMismatch {
            kind: "LoginRequest",
            expected: 103,
            actual: 99,
        };
        assert_eq!(
            err.to_string(),
            "Size mismatch for LoginRequest: expected 103 bytes, got 99"
        );

        let err = DecodeError::UnknownType { code: 4242 };
        assert_eq!(err.to_string(), "Unknown packet type: 4242");
    }

    #[test]
    fn test_encode_error_messages() {
        let err = EncodeError::FieldTooLong { len: 40, max: 32 };
        assert_eq!(
            err.to_string(),
            "Field too long: 40 bytes exceeds maximum of 32"
        );
    }
}
