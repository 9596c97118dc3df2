//! The read, decode and callback cycle.
//!
//! The loop runs until the connection is done or the handle stops being
//! alive. Reads and decoding happen outside the host's serialised context;
//! each callback is delivered through [`Host::serialized`]. Once the loop
//! ends, [`DispatchEvent::EndOfStream`] is delivered exactly once and the
//! handle is closed.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::connection::Connection;
use crate::errors::{DecodeError, DispatchError, FrameError};
use crate::handle::ProcessHandle;
use crate::host::Host;
use crate::reader::FrameReader;

/// Log target for dispatch loop operations.
const DISPATCH_TARGET: &str = "rpcpipe::dispatch";

/// One notification delivered to the dispatch callback.
#[derive(Debug)]
pub enum DispatchEvent<T> {
    /// A frame decoded successfully.
    Message(T),
    /// A frame arrived but its payload was not valid JSON. The loop continues.
    DecodeFailed(DecodeError),
    /// The stream is finished. Delivered exactly once, last.
    EndOfStream,
}

impl<T> DispatchEvent<T> {
    /// Returns true for the final event.
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Why the dispatch loop stopped reading.
#[derive(Debug)]
pub enum StopReason {
    /// The frame reader reported the end of the stream or a framing error.
    Terminated(FrameError),
    /// The handle stopped being alive between frames (shutdown or exit).
    HandleInactive,
    /// The connection was already marked done.
    Done,
}

/// Counters collected by a completed dispatch loop.
#[derive(Debug)]
pub struct DispatchSummary {
    /// Frames that decoded into messages.
    pub messages: usize,
    /// Frames whose payload failed to decode.
    pub decode_errors: usize,
    /// What ended the loop.
    pub stop_reason: StopReason,
}

impl<H: ProcessHandle> Connection<H> {
    /// Runs the dispatch loop on the calling thread until the stream ends.
    ///
    /// Every decoded frame is handed to `callback` as
    /// [`DispatchEvent::Message`]; undecodable payloads arrive as
    /// [`DispatchEvent::DecodeFailed`] without ending the loop. Framing
    /// errors and worker exit end the loop. Afterwards `callback` receives
    /// [`DispatchEvent::EndOfStream`] once and the handle is closed, or
    /// abandoned if its lock cannot be taken within the close timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRunning`] or [`DispatchError::Closed`]
    /// without invoking `callback` when the loop cannot start, including
    /// after an earlier run ended, and
    /// [`DispatchError::OutOfMemory`] after cleanup when a frame body could
    /// not be allocated.
    pub fn run_dispatch_loop<C, S, F>(
        &self,
        codec: &C,
        host: &S,
        mut callback: F,
    ) -> Result<DispatchSummary, DispatchError>
    where
        C: Codec,
        S: Host,
        F: FnMut(DispatchEvent<C::Value>),
    {
        if self.dispatching.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::AlreadyRunning);
        }
        // An abandoned handle stays in the slot, so `done` is checked too.
        let handle = match self.slot.share() {
            Some(handle) if !self.is_done() => handle,
            _ => {
                self.dispatching.store(false, Ordering::Release);
                return Err(DispatchError::Closed);
            }
        };

        debug!(target: DISPATCH_TARGET, pid = self.pid(), "dispatch loop started");
        let mut reader = FrameReader::new(handle.as_ref(), &self.diagnostics);
        let mut messages = 0usize;
        let mut decode_errors = 0usize;
        let mut stop_reason = StopReason::Done;

        while !self.is_done() {
            if !handle.is_alive() && !reader.has_buffered() {
                stop_reason = StopReason::HandleInactive;
                break;
            }

            let frame = match reader.next_frame() {
                Ok(frame) => frame,
                Err(error) => {
                    if error.is_fatal() {
                        warn!(target: DISPATCH_TARGET, %error, "frame stream aborted");
                    } else {
                        debug!(target: DISPATCH_TARGET, %error, "frame stream terminated");
                    }
                    self.mark_done();
                    stop_reason = StopReason::Terminated(error);
                    break;
                }
            };

            let event = match codec.decode(frame.payload()) {
                Ok(message) => {
                    messages += 1;
                    DispatchEvent::Message(message)
                }
                Err(error) => {
                    warn!(
                        target: DISPATCH_TARGET,
                        content_length = frame.content_length(),
                        %error,
                        "failed to decode frame payload"
                    );
                    decode_errors += 1;
                    DispatchEvent::DecodeFailed(error)
                }
            };
            host.serialized(|| callback(event));
        }

        self.mark_done();
        drop(reader);
        host.serialized(|| callback(DispatchEvent::EndOfStream));
        self.close_handle();
        self.dispatching.store(false, Ordering::Release);
        debug!(
            target: DISPATCH_TARGET,
            messages,
            decode_errors,
            "dispatch loop finished"
        );

        if let StopReason::Terminated(FrameError::Allocation { requested }) = stop_reason {
            return Err(DispatchError::OutOfMemory { requested });
        }
        Ok(DispatchSummary {
            messages,
            decode_errors,
            stop_reason,
        })
    }
}

/// Runs the dispatch loop on a dedicated thread.
///
/// # Errors
///
/// Returns the I/O error raised when the thread cannot be started.
pub fn spawn_dispatch_loop<H, C, S, F>(
    connection: Arc<Connection<H>>,
    codec: C,
    host: Arc<S>,
    callback: F,
) -> io::Result<JoinHandle<Result<DispatchSummary, DispatchError>>>
where
    H: ProcessHandle + 'static,
    C: Codec + Send + 'static,
    S: Host + Send + Sync + 'static,
    F: FnMut(DispatchEvent<C::Value>) + Send + 'static,
{
    thread::Builder::new()
        .name(String::from("rpcpipe-dispatch"))
        .spawn(move || connection.run_dispatch_loop(&codec, host.as_ref(), callback))
}
