//! Payload codecs.
//!
//! The transport treats frames as opaque bytes; a [`Codec`] turns them into
//! values and back. [`JsonCodec`] covers the common case with `serde_json`,
//! decoding into [`serde_json::Value`] unless a concrete type is requested.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::errors::{DecodeError, DecodeErrorKind, EncodeError};

/// Converts between in-memory values and frame payloads.
pub trait Codec {
    /// The in-memory message representation.
    type Value;

    /// Encodes `value` as UTF-8 JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the value cannot be represented as JSON.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, EncodeError>;

    /// Decodes one payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] describing where the payload stopped being
    /// valid.
    fn decode(&self, payload: &[u8]) -> Result<Self::Value, DecodeError>;
}

/// `serde_json` codec producing compact JSON.
pub struct JsonCodec<T = serde_json::Value> {
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a codec for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("value", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(value).map_err(EncodeError::from)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(payload).map_err(|error| decode_error(&error, payload))
    }
}

fn decode_error(error: &serde_json::Error, payload: &[u8]) -> DecodeError {
    let kind = match error.classify() {
        Category::Eof => DecodeErrorKind::EndOfFile,
        Category::Syntax if error.to_string().starts_with("trailing characters") => {
            DecodeErrorKind::TrailingContent
        }
        Category::Io | Category::Syntax | Category::Data => DecodeErrorKind::Parse,
    };

    DecodeError {
        kind,
        message: error.to_string(),
        line: error.line(),
        column: error.column(),
        byte_offset: byte_offset(payload, error.line(), error.column()),
    }
}

/// Converts a one-based line/column position into a byte offset.
fn byte_offset(payload: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start: usize = payload
        .split(|byte| *byte == b'\n')
        .take(line - 1)
        .map(|text| text.len() + 1)
        .sum();
    line_start
        .saturating_add(column.saturating_sub(1))
        .min(payload.len())
}
