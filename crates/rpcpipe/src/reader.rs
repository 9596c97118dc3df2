//! Frame extraction from the worker's stdout.
//!
//! [`FrameReader`] walks a small state machine for every frame:
//!
//! ```text
//! SeekHeader --"Content-Length:"--> SeekBodyStart --"\r\n\r\n"--> ReadBody --> Frame
//!      \                                  \                            \
//!       `-------------- stream ended or header invalid ----------------`--> FrameError
//! ```
//!
//! Bytes arrive one chunk at a time; anything read past the end of a frame is
//! kept for the next call. Stderr bytes delivered alongside each read go to
//! the connection's [`ErrorBuffer`], as does any stdout noise that precedes a
//! header. The reader knows nothing about JSON.

use std::sync::Mutex;

use tracing::debug;

use crate::error_buffer::ErrorBuffer;
use crate::errors::FrameError;
use crate::frame::{
    CONTENT_LENGTH_MARKER, Frame, HEADER_TERMINATOR, MAX_LENGTH_FIELD, find, parse_content_length,
};
use crate::handle::{ProcessHandle, lock};

/// Log target for frame reader operations.
const READER_TARGET: &str = "rpcpipe::reader";

/// Size of each read requested from the handle.
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    SeekHeader,
    SeekBodyStart,
    ReadBody { content_length: usize },
}

/// Extracts length-prefixed frames from a process handle.
pub struct FrameReader<'a, H: ?Sized> {
    handle: &'a H,
    diagnostics: &'a Mutex<ErrorBuffer>,
    buffered: Vec<u8>,
    chunk: Vec<u8>,
    stderr: Vec<u8>,
}

impl<'a, H> FrameReader<'a, H>
where
    H: ProcessHandle + ?Sized,
{
    /// Creates a reader over `handle`, capturing stderr into `diagnostics`.
    pub fn new(handle: &'a H, diagnostics: &'a Mutex<ErrorBuffer>) -> Self {
        Self {
            handle,
            diagnostics,
            buffered: Vec::new(),
            chunk: vec![0; READ_CHUNK_SIZE],
            stderr: Vec::new(),
        }
    }

    /// Returns true when bytes read past the previous frame are waiting.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.buffered.is_empty()
    }

    /// Reads the next complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the stream ends or the header is invalid.
    /// A partially received frame is never returned.
    pub fn next_frame(&mut self) -> Result<Frame, FrameError> {
        let mut state = ReaderState::SeekHeader;
        loop {
            state = match state {
                ReaderState::SeekHeader => {
                    self.seek_header()?;
                    ReaderState::SeekBodyStart
                }
                ReaderState::SeekBodyStart => ReaderState::ReadBody {
                    content_length: self.seek_body_start()?,
                },
                ReaderState::ReadBody { content_length } => {
                    return self.read_body(content_length);
                }
            };
        }
    }

    fn seek_header(&mut self) -> Result<(), FrameError> {
        loop {
            if let Some(position) = find(&self.buffered, CONTENT_LENGTH_MARKER) {
                let stray: Vec<u8> = self
                    .buffered
                    .drain(..position + CONTENT_LENGTH_MARKER.len())
                    .take(position)
                    .collect();
                self.record_stray(&stray);
                return Ok(());
            }

            // Keep a tail long enough to hold a marker split across reads.
            let keep = CONTENT_LENGTH_MARKER.len() - 1;
            if self.buffered.len() > keep {
                let excess = self.buffered.len() - keep;
                let stray: Vec<u8> = self.buffered.drain(..excess).collect();
                self.record_stray(&stray);
            }

            if self.fill()? == 0 {
                return Err(if self.buffered.is_empty() {
                    FrameError::EndOfStream
                } else {
                    let stray = std::mem::take(&mut self.buffered);
                    self.record_stray(&stray);
                    FrameError::MissingHeader
                });
            }
        }
    }

    fn seek_body_start(&mut self) -> Result<usize, FrameError> {
        loop {
            if let Some(position) = find(&self.buffered, HEADER_TERMINATOR) {
                let field: Vec<u8> = self
                    .buffered
                    .drain(..position + HEADER_TERMINATOR.len())
                    .take(position)
                    .collect();
                return parse_content_length(&field);
            }

            if self.buffered.len() > MAX_LENGTH_FIELD + HEADER_TERMINATOR.len() {
                let field = self.buffered.get(..MAX_LENGTH_FIELD).unwrap_or_default();
                return Err(FrameError::InvalidLength {
                    text: String::from_utf8_lossy(field).into_owned(),
                });
            }

            if self.fill()? == 0 {
                return Err(FrameError::MissingTerminator);
            }
        }
    }

    fn read_body(&mut self, content_length: usize) -> Result<Frame, FrameError> {
        let mut body = Vec::new();
        body.try_reserve_exact(content_length)
            .map_err(|_| FrameError::Allocation {
                requested: content_length,
            })?;

        loop {
            let wanted = content_length - body.len();
            let available = wanted.min(self.buffered.len());
            body.extend(self.buffered.drain(..available));
            if body.len() == content_length {
                break;
            }
            if self.fill()? == 0 {
                return Err(FrameError::Truncated {
                    expected: content_length,
                    received: body.len(),
                });
            }
        }

        debug!(target: READER_TARGET, content_length, "frame received");
        Ok(Frame::new(body))
    }

    /// Performs one chunked read, retrying while the worker is alive.
    ///
    /// Returns zero only when nothing arrived and the worker is gone.
    fn fill(&mut self) -> Result<usize, FrameError> {
        loop {
            let outcome = self.handle.recv(&mut self.chunk, &mut self.stderr);
            self.flush_stderr();
            let count = outcome?;
            if count > 0 {
                let received = self.chunk.get(..count).unwrap_or_default();
                self.buffered.extend_from_slice(received);
                return Ok(count);
            }
            if !self.handle.is_alive() {
                return Ok(0);
            }
        }
    }

    fn flush_stderr(&mut self) {
        if self.stderr.is_empty() {
            return;
        }
        lock(self.diagnostics).append(&self.stderr);
        self.stderr.clear();
    }

    fn record_stray(&self, stray: &[u8]) {
        if stray.is_empty() {
            return;
        }
        debug!(
            target: READER_TARGET,
            bytes = stray.len(),
            "captured stray output outside a frame"
        );
        lock(self.diagnostics).append(stray);
    }
}
