//! Connection lifecycle: open, send, shutdown and status.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::{ConnectionConfig, ConnectionTuning};
use crate::error_buffer::ErrorBuffer;
use crate::errors::{HandleUnavailable, SendError, SpawnError};
use crate::frame::encode_frame;
use crate::handle::{ChildProcess, ProcessHandle, lock};
use crate::slot::HandleSlot;

/// Log target for connection operations.
pub(crate) const CONNECTION_TARGET: &str = "rpcpipe::connection";

/// Value reported by [`Connection::pid`] once the connection is done.
pub const DEAD_PID: i64 = -1;

/// A spawned worker exchanging length-prefixed JSON frames.
///
/// The connection is shared by reference: `send` and `shutdown` may be called
/// from any thread while one thread runs the dispatch loop. Wrap it in an
/// `Arc` to hand it to a dispatch thread.
///
/// # Example
///
/// ```rust,no_run
/// use rpcpipe::{Connection, ConnectionConfig, JsonCodec};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::from_argv(["rust-analyzer"]).ok_or("empty argv")?;
/// let connection = Connection::open(&config)?;
/// let codec = JsonCodec::<serde_json::Value>::new();
/// connection.send_message(&codec, &serde_json::json!({"jsonrpc": "2.0", "method": "exit"}))?;
/// connection.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Connection<H = ChildProcess> {
    pub(crate) slot: HandleSlot<H>,
    pid: u32,
    done: AtomicBool,
    cancel_send: AtomicBool,
    pub(crate) dispatching: AtomicBool,
    pub(crate) diagnostics: Mutex<ErrorBuffer>,
    pub(crate) tuning: ConnectionTuning,
}

impl Connection<ChildProcess> {
    /// Spawns the worker described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the worker cannot be started; no
    /// connection exists in that case.
    pub fn open(config: &ConnectionConfig) -> Result<Self, SpawnError> {
        let handle = ChildProcess::spawn(config)?;
        Ok(Self::with_handle(handle, config.tuning))
    }
}

impl<H: ProcessHandle> Connection<H> {
    /// Wraps an already spawned handle.
    #[must_use]
    pub fn with_handle(handle: H, tuning: ConnectionTuning) -> Self {
        let pid = handle.pid();
        Self {
            slot: HandleSlot::new(handle),
            pid,
            done: AtomicBool::new(false),
            cancel_send: AtomicBool::new(false),
            dispatching: AtomicBool::new(false),
            diagnostics: Mutex::new(ErrorBuffer::new(tuning.stderr_capacity)),
            tuning,
        }
    }

    /// Sends one payload, prefixed with its `Content-Length` header.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Unavailable`] when the handle lock cannot be
    /// taken within the send timeout or the connection is closed, and
    /// [`SendError::ShortWrite`] when the worker accepted only part of the
    /// frame (for example because `shutdown` cancelled the write).
    pub fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        let guard = self
            .slot
            .acquire(self.tuning.send_lock_timeout)
            .map_err(|reason| {
                debug!(target: CONNECTION_TARGET, pid = self.pid, %reason, "send unavailable");
                SendError::Unavailable { reason }
            })?;

        let framed = encode_frame(payload).map_err(|_| SendError::Allocation {
            requested: payload.len(),
        })?;
        let expected = framed.len();
        let written = guard
            .handle()
            .send(&self.cancel_send, &framed)
            .map_err(SendError::Io)?;

        if written < expected {
            warn!(
                target: CONNECTION_TARGET,
                pid = self.pid,
                written,
                expected,
                "short write to worker"
            );
            return Err(SendError::ShortWrite { written, expected });
        }

        debug!(target: CONNECTION_TARGET, pid = self.pid, bytes = expected, "frame sent");
        Ok(())
    }

    /// Encodes `value` with `codec` and sends it as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] when encoding fails, otherwise the same
    /// errors as [`Self::send`].
    pub fn send_message<C>(&self, codec: &C, value: &C::Value) -> Result<(), SendError>
    where
        C: Codec,
    {
        let payload = codec.encode(value)?;
        self.send(&payload)
    }

    /// Cancels in-flight sends and unblocks the reader.
    ///
    /// The cancel flag is set unconditionally. The receive cancel is issued
    /// only if the handle lock is obtained within the shutdown timeout.
    /// Calling this repeatedly or concurrently with `send` is safe; it never
    /// closes the handle itself.
    pub fn shutdown(&self) {
        self.cancel_send.store(true, Ordering::Release);
        match self.slot.acquire(self.tuning.shutdown_lock_timeout) {
            Ok(guard) => {
                guard.handle().cancel_recv();
                debug!(target: CONNECTION_TARGET, pid = self.pid, "receive cancelled");
            }
            Err(HandleUnavailable::Closed) => {
                debug!(target: CONNECTION_TARGET, pid = self.pid, "shutdown after close");
            }
            Err(HandleUnavailable::TimedOut) => {
                warn!(
                    target: CONNECTION_TARGET,
                    pid = self.pid,
                    "handle busy; receive cancel skipped"
                );
            }
        }
    }

    /// Process id of the worker, or [`DEAD_PID`] once the connection is done.
    #[must_use]
    pub fn pid(&self) -> i64 {
        if self.is_done() {
            DEAD_PID
        } else {
            i64::from(self.pid)
        }
    }

    /// Returns true once no further frames will be produced.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Returns true once the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Copies the captured diagnostic bytes.
    #[must_use]
    pub fn stderr_snapshot(&self) -> Vec<u8> {
        lock(&self.diagnostics).snapshot()
    }

    /// Returns the captured diagnostics as text, replacing invalid UTF-8.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        lock(&self.diagnostics).to_text()
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Closes the handle under the lock, or abandons it on timeout.
    pub(crate) fn close_handle(&self) {
        match self.slot.acquire(self.tuning.close_lock_timeout) {
            Ok(guard) => {
                guard.handle().close();
                guard.retire();
                debug!(target: CONNECTION_TARGET, pid = self.pid, "handle closed");
            }
            Err(HandleUnavailable::Closed) => {}
            Err(HandleUnavailable::TimedOut) => {
                warn!(
                    target: CONNECTION_TARGET,
                    pid = self.pid,
                    "handle lock timed out; abandoning handle"
                );
            }
        }
    }
}

impl<H> std::fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pid", &self.pid)
            .field("done", &self.done.load(Ordering::Acquire))
            .field("cancel_send", &self.cancel_send.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
