//! Shared fixtures and helpers for connection tests.

mod scripted_handle;
mod world;

use crate::dispatch::DispatchEvent;
use crate::errors::DecodeErrorKind;

pub use scripted_handle::{ScriptedHandle, SendGate, Step};
pub use world::TestWorld;

/// The example frame used throughout the tests.
pub const EXAMPLE_FRAME: &[u8] = b"Content-Length: 11\r\n\r\n{\"ok\":true}";

/// A dispatch event reduced to something comparable in assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    /// A decoded message.
    Message(serde_json::Value),
    /// A decode failure of the given kind.
    DecodeFailed(DecodeErrorKind),
    /// The end-of-stream notification.
    EndOfStream,
}

impl From<DispatchEvent<serde_json::Value>> for Observed {
    fn from(event: DispatchEvent<serde_json::Value>) -> Self {
        match event {
            DispatchEvent::Message(value) => Self::Message(value),
            DispatchEvent::DecodeFailed(error) => Self::DecodeFailed(error.kind),
            DispatchEvent::EndOfStream => Self::EndOfStream,
        }
    }
}

/// Builds a frame around `payload`.
#[must_use]
pub fn framed(payload: &str) -> Vec<u8> {
    let mut bytes = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}
