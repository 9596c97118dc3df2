//! Wire framing shared by the sender and the frame reader.
//!
//! Each message travels as:
//! ```text
//! Content-Length: <decimal length>\r\n
//! \r\n
//! <payload>
//! ```
//! Frames are concatenated without any other delimiter and no other header
//! lines are emitted.

use std::collections::TryReserveError;

use crate::errors::FrameError;

/// Marker that opens every frame header.
pub const CONTENT_LENGTH_MARKER: &[u8] = b"Content-Length:";

/// Sequence that separates the header from the payload.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Longest header value accepted between the marker and the terminator.
pub(crate) const MAX_LENGTH_FIELD: usize = 64;

/// One length-prefixed payload extracted from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wraps a payload received from the wire.
    #[must_use]
    pub const fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Declared length of the frame, always equal to the payload size.
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.payload.len()
    }

    /// Borrows the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Takes ownership of the payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Prefixes `payload` with its `Content-Length` header.
///
/// # Errors
///
/// Returns the reservation error when the framed buffer cannot be allocated.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TryReserveError> {
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    let mut framed = Vec::new();
    framed.try_reserve_exact(header.len().saturating_add(payload.len()))?;
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Parses the text between the marker and the terminator as a length.
///
/// Surrounding ASCII whitespace is ignored; anything other than decimal digits
/// is rejected. A further header line such as `Content-Type` lands in the same
/// field, so workers that send one (some LSP servers do) end the session.
pub(crate) fn parse_content_length(field: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidLength {
        text: String::from_utf8_lossy(field).into_owned(),
    };

    let digits = field.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(invalid)
}

/// Finds the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
