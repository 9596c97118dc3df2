//! Error types for the worker transport.
//!
//! Each failure domain gets its own enum so callers can decide how far an
//! error propagates: spawn failures never produce a connection, send failures
//! leave the connection open, framing failures end the dispatch loop, and
//! decode failures are reported per frame without ending the session.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors raised while starting the worker process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The worker binary could not be located.
    #[error("worker binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The operating system refused to start the worker.
    #[error("failed to spawn worker process {command}: {source}")]
    SpawnFailed {
        /// The command that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// One of the worker's standard streams was not captured.
    #[error("failed to capture worker {stream}")]
    MissingPipe {
        /// Name of the missing stream (`stdin`, `stdout` or `stderr`).
        stream: &'static str,
    },

    /// A stream pump thread could not be started.
    #[error("failed to start {name} thread: {source}")]
    Thread {
        /// Name of the thread that failed to start.
        name: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Why the process handle could not be borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleUnavailable {
    /// Another operation held the handle for longer than the configured timeout.
    TimedOut,
    /// The handle has already been closed.
    Closed,
}

impl fmt::Display for HandleUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => f.write_str("handle lock timed out"),
            Self::Closed => f.write_str("connection is closed"),
        }
    }
}

/// Errors reported to the caller of `send`. The connection stays open.
#[derive(Debug, Error)]
pub enum SendError {
    /// The handle lock could not be taken or the connection was closed.
    #[error("connection unavailable: {reason}")]
    Unavailable {
        /// Why the handle could not be used.
        reason: HandleUnavailable,
    },

    /// The worker accepted fewer bytes than the framed message holds.
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite {
        /// Bytes accepted before the write stopped.
        written: usize,
        /// Size of the framed message.
        expected: usize,
    },

    /// Writing to the worker's stdin failed.
    #[error("failed to write to worker: {0}")]
    Io(#[source] io::Error),

    /// The value could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The framed message buffer could not be allocated.
    #[error("failed to allocate {requested} bytes for outgoing frame")]
    Allocation {
        /// Size of the buffer that could not be reserved.
        requested: usize,
    },
}

/// Errors produced while extracting a frame from the worker's stdout.
///
/// Every variant except [`FrameError::Allocation`] is treated as stream
/// termination: the dispatch loop ends and reports end-of-stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended cleanly between frames.
    #[error("worker output ended")]
    EndOfStream,

    /// The stream ended after bytes that never formed a `Content-Length` header.
    #[error("stream ended without a Content-Length header")]
    MissingHeader,

    /// The stream ended before the `\r\n\r\n` header terminator arrived.
    #[error("stream ended before the header terminator")]
    MissingTerminator,

    /// The header value was not a decimal length.
    #[error("invalid Content-Length value: {text:?}")]
    InvalidLength {
        /// The header text found between the marker and the terminator.
        text: String,
    },

    /// The stream ended before the declared number of body bytes arrived.
    #[error("frame truncated: received {received} of {expected} bytes")]
    Truncated {
        /// Declared content length.
        expected: usize,
        /// Bytes received before the stream ended.
        received: usize,
    },

    /// Reading from the worker failed.
    #[error("failed to read from worker: {0}")]
    Io(#[from] io::Error),

    /// The frame body buffer could not be allocated.
    #[error("failed to allocate {requested} bytes for incoming frame")]
    Allocation {
        /// Declared content length that could not be reserved.
        requested: usize,
    },
}

impl FrameError {
    /// Returns true when the error must be propagated to the caller instead of
    /// ending the stream quietly.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Allocation { .. })
    }
}

/// A value could not be encoded to JSON.
#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Classification of a payload decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The payload ended before a complete value was read.
    EndOfFile,
    /// A complete value was followed by additional data.
    TrailingContent,
    /// Any other syntax or data error.
    Parse,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::EndOfFile => "json-end-of-file",
            Self::TrailingContent => "json-trailing-content",
            Self::Parse => "json-parse-error",
        };
        f.write_str(label)
    }
}

/// A well-framed payload did not hold valid JSON.
///
/// Decode errors are recoverable: the dispatch loop reports them through the
/// callback and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DecodeError {
    /// Failure classification.
    pub kind: DecodeErrorKind,
    /// Human-readable description from the decoder.
    pub message: String,
    /// One-based line of the failure, or zero when unknown.
    pub line: usize,
    /// One-based column of the failure, or zero when unknown.
    pub column: usize,
    /// Byte offset of the failure within the payload.
    pub byte_offset: usize,
}

/// Errors that end a dispatch loop abnormally.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Another dispatch loop is already running on this connection.
    #[error("a dispatch loop is already running on this connection")]
    AlreadyRunning,

    /// The connection was closed before the loop started.
    #[error("connection is closed")]
    Closed,

    /// A frame body could not be allocated. The end-of-stream event was still
    /// delivered and the handle closed before this was returned.
    #[error("out of memory: could not allocate {requested} bytes for a frame")]
    OutOfMemory {
        /// Declared content length that could not be reserved.
        requested: usize,
    },
}
