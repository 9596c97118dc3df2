//! Length-prefixed JSON-RPC transport over a worker process's stdio.
//!
//! The crate spawns a worker, writes `Content-Length` framed JSON to its
//! stdin, and runs a dispatch loop that extracts frames from its stdout,
//! decodes them, and hands each one to a caller-supplied callback. Stderr is
//! captured into a bounded buffer for diagnostics. Request/response
//! correlation is left to the caller: every decoded frame goes to the same
//! callback.
//!
//! The moving parts are kept behind small seams so tests and embedders can
//! substitute them:
//!
//! - [`ProcessHandle`]: cancellable access to the worker's streams;
//!   [`ChildProcess`] is the `std::process` implementation.
//! - [`Codec`]: payload encoding; [`JsonCodec`] uses `serde_json`.
//! - [`Host`]: the embedding application's serialisation primitive;
//!   callbacks always run inside [`Host::serialized`].
//!
//! # Example
//!
//! ```rust,no_run
//! use rpcpipe::{Connection, ConnectionConfig, DispatchEvent, JsonCodec, Unserialized};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::from_argv(["my-language-server", "--stdio"])
//!     .ok_or("empty argv")?;
//! let connection = Connection::open(&config)?;
//! let codec = JsonCodec::<serde_json::Value>::new();
//! connection.send_message(&codec, &serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}))?;
//! connection.run_dispatch_loop(&codec, &Unserialized, |event| match event {
//!     DispatchEvent::Message(message) => println!("{message}"),
//!     DispatchEvent::DecodeFailed(error) => eprintln!("{error}"),
//!     DispatchEvent::EndOfStream => eprintln!("worker finished"),
//! })?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod connection;
mod dispatch;
mod error_buffer;
mod errors;
mod frame;
mod handle;
mod host;
mod reader;
mod slot;

#[cfg(test)]
mod tests;

pub use codec::{Codec, JsonCodec};
pub use config::{
    ConnectionConfig, ConnectionTuning, DEFAULT_CLOSE_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_SEND_LOCK_TIMEOUT, DEFAULT_SHUTDOWN_LOCK_TIMEOUT, DEFAULT_WRITE_CHUNK_SIZE,
};
pub use connection::{Connection, DEAD_PID};
pub use dispatch::{DispatchEvent, DispatchSummary, StopReason, spawn_dispatch_loop};
pub use error_buffer::{DEFAULT_STDERR_CAPACITY, ErrorBuffer};
pub use errors::{
    DecodeError, DecodeErrorKind, DispatchError, EncodeError, FrameError, HandleUnavailable,
    SendError, SpawnError,
};
pub use frame::{CONTENT_LENGTH_MARKER, Frame, HEADER_TERMINATOR, encode_frame};
pub use handle::{ChildProcess, ProcessHandle};
pub use host::{GlobalLock, Host, HostGuard, Unserialized};
pub use reader::FrameReader;
