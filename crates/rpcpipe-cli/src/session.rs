//! Relays JSON between the bridge's own streams and the worker.
//!
//! The dispatch loop runs on a scoped thread and writes every message to the
//! output as one JSON line. The calling thread plays the host: it holds the
//! [`GlobalLock`] while handling input and releases it while waiting for
//! input or sending, so dispatch callbacks interleave with sends.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use rpcpipe::{
    Connection, DispatchEvent, DispatchSummary, GlobalLock, HostGuard, JsonCodec, ProcessHandle,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::AppError;

/// Log target for bridge operations.
const SESSION_TARGET: &str = "rpcpipe::cli";

/// Timing knobs for one bridge session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionTiming {
    /// How often the host re-checks the connection while idle.
    pub(crate) poll_interval: Duration,
    /// Grace period for the worker once input ends.
    pub(crate) drain_timeout: Duration,
}

/// Runs one session until the dispatch loop finishes.
pub(crate) fn bridge<H, R, W>(
    connection: &Connection<H>,
    input: R,
    output: &mut W,
    timing: SessionTiming,
) -> Result<DispatchSummary, AppError>
where
    H: ProcessHandle,
    R: Read + Send + 'static,
    W: Write + Send,
{
    let host = GlobalLock::new();
    let codec = JsonCodec::<Value>::new();
    let lines = spawn_input_reader(input).map_err(AppError::Thread)?;

    thread::scope(|scope| {
        let dispatcher = thread::Builder::new()
            .name(String::from("rpcpipe-dispatch"))
            .spawn_scoped(scope, || {
                connection.run_dispatch_loop(&codec, &host, |event| {
                    emit(connection, output, event);
                })
            })
            .map_err(AppError::Thread)?;

        forward_input(connection, &host, &codec, &lines, timing);

        match dispatcher.join() {
            Ok(outcome) => outcome.map_err(AppError::from),
            Err(_) => Err(AppError::DispatchPanicked),
        }
    })
}

fn emit<H, W>(connection: &Connection<H>, output: &mut W, event: DispatchEvent<Value>)
where
    H: ProcessHandle,
    W: Write,
{
    match event {
        DispatchEvent::Message(message) => {
            if let Err(error) = write_line(output, &message) {
                warn!(target: SESSION_TARGET, %error, "failed to write message");
            }
        }
        DispatchEvent::DecodeFailed(error) => {
            warn!(
                target: SESSION_TARGET,
                kind = %error.kind,
                line = error.line,
                column = error.column,
                "worker sent an undecodable frame"
            );
        }
        DispatchEvent::EndOfStream => {
            let diagnostics = connection.stderr_text();
            info!(
                target: SESSION_TARGET,
                stderr = %diagnostics.trim_end(),
                "worker stream ended"
            );
        }
    }
}

fn write_line<W: Write>(output: &mut W, message: &Value) -> io::Result<()> {
    serde_json::to_writer(&mut *output, message)?;
    output.write_all(b"\n")?;
    output.flush()
}

fn forward_input<H>(
    connection: &Connection<H>,
    host: &GlobalLock,
    codec: &JsonCodec<Value>,
    lines: &Receiver<String>,
    timing: SessionTiming,
) where
    H: ProcessHandle,
{
    let mut guard = host.acquire();
    while !connection.is_done() {
        match guard.unlocked(|| lines.recv_timeout(timing.poll_interval)) {
            Ok(line) => forward_line(connection, &mut guard, codec, &line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!(target: SESSION_TARGET, "input ended; draining worker output");
                drain(connection, &mut guard, timing);
                guard.unlocked(|| connection.shutdown());
                return;
            }
        }
    }
}

fn forward_line<H>(
    connection: &Connection<H>,
    guard: &mut HostGuard<'_>,
    codec: &JsonCodec<Value>,
    line: &str,
) where
    H: ProcessHandle,
{
    if line.trim().is_empty() {
        return;
    }
    let value = match serde_json::from_str::<Value>(line) {
        Ok(value) => value,
        Err(error) => {
            warn!(target: SESSION_TARGET, %error, "skipping input line that is not JSON");
            return;
        }
    };
    if let Err(error) = guard.unlocked(|| connection.send_message(codec, &value)) {
        warn!(target: SESSION_TARGET, %error, "failed to send message to worker");
    }
}

fn drain<H>(connection: &Connection<H>, guard: &mut HostGuard<'_>, timing: SessionTiming)
where
    H: ProcessHandle,
{
    let deadline = Instant::now() + timing.drain_timeout;
    while !connection.is_done() && Instant::now() < deadline {
        guard.unlocked(|| thread::sleep(timing.poll_interval));
    }
}

/// Reads input lines on a detached thread so a blocked read never holds up exit.
fn spawn_input_reader<R>(input: R) -> io::Result<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(String::from("rpcpipe-input"))
        .spawn(move || {
            for line in BufReader::new(input).lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(target: SESSION_TARGET, %error, "failed to read input");
                        break;
                    }
                }
            }
        })
        .map(drop)?;
    Ok(receiver)
}
