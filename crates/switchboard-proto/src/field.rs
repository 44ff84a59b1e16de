//! Fixed-width, NUL-padded text fields.
//!
//! Every text field in the protocol occupies a fixed number of bytes: up to
//! `N - 1` bytes of UTF-8 followed by NUL padding. Fields written by this
//! crate always end in at least one NUL. Fields read from the wire are taken
//! up to the first NUL, or the whole width when a peer omitted the terminator.

use crate::error::EncodeError;
use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};
use std::borrow::Cow;
use std::fmt;

/// Maximum length in bytes of identifier text (user id, password, username)
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length in bytes of chat text
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Wire width of identifier fields
pub const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;

/// Wire width of chat text fields
pub const MESSAGE_FIELD_LEN: usize = MAX_MESSAGE_LEN + 1;

/// Identifier field (33 bytes on the wire)
pub type NameField = FixedStr<NAME_FIELD_LEN>;

/// Chat text field (1025 bytes on the wire)
pub type MessageField = FixedStr<MESSAGE_FIELD_LEN>;

/// Text stored in exactly `N` wire bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    raw: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Longest text the field can carry
    pub const MAX_LEN: usize = N - 1;

    /// Build a field from `text`, rejecting text that does not fit.
    pub fn new(text: &str) -> Result<Self, EncodeError> {
        if text.len() > Self::MAX_LEN {
            return Err(EncodeError::FieldTooLong {
                len: text.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self::copy_from(text.as_bytes()))
    }

    /// Build a field from `text`, cutting it at the last character boundary
    /// that fits.
    pub fn truncated(text: &str) -> Self {
        let mut end = text.len().min(Self::MAX_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self::copy_from(&text.as_bytes()[..end])
    }

    /// Wrap raw wire bytes as read from a peer.
    pub const fn from_raw(raw: [u8; N]) -> Self {
        Self { raw }
    }

    /// Text bytes, up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.raw.iter().position(|&b| b == 0).unwrap_or(N);
        &self.raw[..end]
    }

    /// Text content; invalid UTF-8 from a peer is replaced.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Length of the text in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the field carries no text.
    pub fn is_empty(&self) -> bool {
        self.raw.first().is_none_or(|&b| b == 0)
    }

    /// The full `N` bytes as written to the wire.
    pub const fn raw(&self) -> &[u8; N] {
        &self.raw
    }

    fn copy_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw[..bytes.len()].copy_from_slice(bytes);
        Self { raw }
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self { raw: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string_lossy(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl<const N: usize> BinRead for FixedStr<N> {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mut raw = [0u8; N];
        reader.read_exact(&mut raw)?;
        Ok(Self { raw })
    }
}

impl<const N: usize> BinWrite for FixedStr<N> {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        writer.write_all(&self.raw)?;
        Ok(())
    }
}
