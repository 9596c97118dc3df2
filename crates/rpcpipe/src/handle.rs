//! Process handles: the worker's standard streams behind cancellable I/O.
//!
//! [`ProcessHandle`] is the seam between the connection logic and the
//! operating system. [`ChildProcess`] implements it over `std::process`:
//! stdout and stderr are drained by pump threads into channels so reads can
//! poll with a timeout, and stdin is fed by a writer thread so a blocked
//! write never pins the caller past its cancellation window.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::errors::SpawnError;

/// Log target for process handle operations.
const HANDLE_TARGET: &str = "rpcpipe::handle";

/// Size of each read performed by the pump threads.
const PUMP_CHUNK_SIZE: usize = 8 * 1024;

/// Cancellable access to a spawned worker's standard streams.
///
/// Implementations must allow `send` and `recv` to run concurrently from two
/// threads; the connection serialises everything else through its handle lock.
pub trait ProcessHandle: Send + Sync {
    /// Writes `bytes` to the worker, checking `cancel` between chunks.
    ///
    /// Returns how many bytes were accepted, which is less than `bytes.len()`
    /// when the write was cancelled.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the worker's stdin is closed or broken.
    fn send(&self, cancel: &AtomicBool, bytes: &[u8]) -> io::Result<usize>;

    /// Reads up to `out.len()` bytes of the worker's stdout.
    ///
    /// Any stderr bytes available at the time of the call are appended to
    /// `diagnostics`. Returns zero when nothing arrived within the handle's
    /// polling window; callers consult [`Self::is_alive`] to tell a quiet
    /// worker from a finished one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the stream cannot be read.
    fn recv(&self, out: &mut [u8], diagnostics: &mut Vec<u8>) -> io::Result<usize>;

    /// Makes pending and future reads return promptly with no data.
    fn cancel_recv(&self);

    /// Returns true while the worker can still produce output.
    fn is_alive(&self) -> bool;

    /// Terminates the worker and releases its streams.
    fn close(&self);

    /// Operating system process id.
    fn pid(&self) -> u32;
}

/// Recovers the guard from a poisoned mutex.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StdinWriter {
    chunks: Sender<Vec<u8>>,
    acks: Receiver<io::Result<usize>>,
}

enum Ack {
    Written(usize),
    Failed(io::Error),
    Cancelled,
}

struct StdoutState {
    chunks: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// A worker spawned through `std::process`.
pub struct ChildProcess {
    child: Mutex<Child>,
    pid: u32,
    writer: Mutex<Option<StdinWriter>>,
    stdout: Mutex<StdoutState>,
    stderr: Mutex<Receiver<Vec<u8>>>,
    cancelled: AtomicBool,
    stdout_open: AtomicBool,
    exit_seen: AtomicBool,
    poll_interval: Duration,
    write_chunk_size: usize,
}

impl ChildProcess {
    /// Spawns the worker described by `config` with all three streams piped.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the process or its pump threads cannot be
    /// started.
    pub fn spawn(config: &ConnectionConfig) -> Result<Self, SpawnError> {
        let command_name = config.command.display().to_string();
        debug!(
            target: HANDLE_TARGET,
            command = %command_name,
            args = ?config.args,
            "spawning worker process"
        );

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if config.clear_env {
            command.env_clear();
        }
        command.envs(config.env.iter().map(|(key, value)| (key, value)));
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SpawnError::BinaryNotFound {
                    command: command_name.clone(),
                    source,
                }
            } else {
                SpawnError::SpawnFailed {
                    command: command_name.clone(),
                    source,
                }
            }
        })?;

        match Self::attach(&mut child) {
            Ok(parts) => {
                let pid = child.id();
                debug!(target: HANDLE_TARGET, pid, "worker process spawned");
                Ok(Self::assemble(child, parts, config))
            }
            Err(error) => {
                reap(&mut child);
                Err(error)
            }
        }
    }

    fn attach(child: &mut Child) -> Result<AttachedStreams, SpawnError> {
        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::MissingPipe { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::MissingPipe { stream: "stderr" })?;

        let (stdout_tx, stdout_rx) = mpsc::channel();
        let (stderr_tx, stderr_rx) = mpsc::channel();
        spawn_pump("rpcpipe-stdout", stdout, stdout_tx)?;
        spawn_pump("rpcpipe-stderr", stderr, stderr_tx)?;
        let writer = spawn_writer(stdin)?;

        Ok(AttachedStreams {
            writer,
            stdout: stdout_rx,
            stderr: stderr_rx,
        })
    }

    fn assemble(child: Child, parts: AttachedStreams, config: &ConnectionConfig) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            writer: Mutex::new(Some(parts.writer)),
            stdout: Mutex::new(StdoutState {
                chunks: parts.stdout,
                pending: VecDeque::new(),
            }),
            stderr: Mutex::new(parts.stderr),
            cancelled: AtomicBool::new(false),
            stdout_open: AtomicBool::new(true),
            exit_seen: AtomicBool::new(false),
            poll_interval: config.tuning.poll_interval,
            write_chunk_size: config.tuning.write_chunk_size.max(1),
        }
    }

    fn drain_stderr(&self, diagnostics: &mut Vec<u8>) {
        let stderr = lock(&self.stderr);
        loop {
            match stderr.try_recv() {
                Ok(chunk) => diagnostics.extend_from_slice(&chunk),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Ends the stream after a quiet poll that follows the worker's exit.
    ///
    /// A descendant that inherited stdout can hold the pipe open long after
    /// the worker itself is gone. One full quiet window after the exit is
    /// observed lets the pump deliver whatever the worker wrote last.
    fn note_quiet_poll(&self) {
        if self.exit_seen.load(Ordering::Acquire) {
            debug!(
                target: HANDLE_TARGET,
                pid = self.pid,
                "worker exited while its stdout is still held open"
            );
            self.stdout_open.store(false, Ordering::Release);
        } else if matches!(lock(&self.child).try_wait(), Ok(Some(_))) {
            self.exit_seen.store(true, Ordering::Release);
        }
    }

    fn await_ack(&self, writer: &StdinWriter, cancel: &AtomicBool) -> Ack {
        loop {
            match writer.acks.recv_timeout(self.poll_interval) {
                Ok(Ok(written)) => return Ack::Written(written),
                Ok(Err(error)) => return Ack::Failed(error),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.load(Ordering::Acquire) {
                        return Ack::Cancelled;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Ack::Failed(broken_pipe("worker stdin writer stopped"));
                }
            }
        }
    }
}

struct AttachedStreams {
    writer: StdinWriter,
    stdout: Receiver<Vec<u8>>,
    stderr: Receiver<Vec<u8>>,
}

impl ProcessHandle for ChildProcess {
    fn send(&self, cancel: &AtomicBool, bytes: &[u8]) -> io::Result<usize> {
        let mut slot = lock(&self.writer);
        let Some(writer) = slot.as_ref() else {
            return Err(broken_pipe("worker stdin is closed"));
        };

        let mut written = 0usize;
        for chunk in bytes.chunks(self.write_chunk_size) {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            if writer.chunks.send(chunk.to_vec()).is_err() {
                *slot = None;
                return Err(broken_pipe("worker stdin writer stopped"));
            }
            match self.await_ack(writer, cancel) {
                Ack::Written(count) => written += count,
                Ack::Failed(error) => {
                    *slot = None;
                    return Err(error);
                }
                Ack::Cancelled => {
                    // The chunk is still in flight, so the stream position is unknown.
                    debug!(
                        target: HANDLE_TARGET,
                        pid = self.pid,
                        written,
                        "send cancelled while a write was pending"
                    );
                    *slot = None;
                    break;
                }
            }
        }

        Ok(written)
    }

    fn recv(&self, out: &mut [u8], diagnostics: &mut Vec<u8>) -> io::Result<usize> {
        self.drain_stderr(diagnostics);
        if out.is_empty() {
            return Ok(0);
        }

        let mut stdout = lock(&self.stdout);
        if stdout.pending.is_empty() {
            if self.cancelled.load(Ordering::Acquire) {
                return Ok(0);
            }
            match stdout.chunks.recv_timeout(self.poll_interval) {
                Ok(chunk) => stdout.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => self.note_quiet_poll(),
                Err(RecvTimeoutError::Disconnected) => {
                    self.stdout_open.store(false, Ordering::Release);
                }
            }
            self.drain_stderr(diagnostics);
        }

        let count = out.len().min(stdout.pending.len());
        for (target, byte) in out.iter_mut().zip(stdout.pending.drain(..count)) {
            *target = byte;
        }
        Ok(count)
    }

    fn cancel_recv(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_alive(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && self.stdout_open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.cancelled.store(true, Ordering::Release);
        drop(lock(&self.writer).take());
        reap(&mut lock(&self.child));
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Kills the child if it is still running and waits for it.
fn reap(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: HANDLE_TARGET, pid = child.id(), ?status, "worker exited");
        }
        Ok(None) | Err(_) => {
            if let Err(error) = child.kill() {
                warn!(
                    target: HANDLE_TARGET,
                    pid = child.id(),
                    %error,
                    "failed to kill worker process"
                );
            }
            drop(child.wait());
        }
    }
}

fn broken_pipe(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, message)
}

/// Copies everything read from `source` into `sink` until EOF.
///
/// Dropping the sender on exit tells the receiving side that the stream is
/// finished.
fn spawn_pump<R>(name: &'static str, mut source: R, sink: Sender<Vec<u8>>) -> Result<(), SpawnError>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let mut buffer = vec![0u8; PUMP_CHUNK_SIZE];
            loop {
                match source.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => {
                        let chunk = buffer.get(..count).unwrap_or_default().to_vec();
                        if sink.send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => {
                        debug!(target: HANDLE_TARGET, stream = name, %error, "stream read failed");
                        break;
                    }
                }
            }
        })
        .map(drop)
        .map_err(|source| SpawnError::Thread { name, source })
}

/// Starts the thread that owns the worker's stdin.
fn spawn_writer(mut stdin: ChildStdin) -> Result<StdinWriter, SpawnError> {
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>();
    let (ack_tx, ack_rx) = mpsc::channel();
    thread::Builder::new()
        .name(String::from("rpcpipe-stdin"))
        .spawn(move || {
            for chunk in chunk_rx {
                let outcome = stdin
                    .write_all(&chunk)
                    .and_then(|()| stdin.flush())
                    .map(|()| chunk.len());
                let failed = outcome.is_err();
                if ack_tx.send(outcome).is_err() || failed {
                    break;
                }
            }
        })
        .map_err(|source| SpawnError::Thread {
            name: "rpcpipe-stdin",
            source,
        })?;

    Ok(StdinWriter {
        chunks: chunk_tx,
        acks: ack_rx,
    })
}
