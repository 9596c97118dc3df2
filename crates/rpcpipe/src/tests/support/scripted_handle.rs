//! A process handle that replays a fixed script of output.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::handle::{ProcessHandle, lock};

/// One scripted delivery from the fake worker.
#[derive(Debug, Clone)]
pub enum Step {
    /// Bytes written to stdout.
    Stdout(Vec<u8>),
    /// Bytes written to stderr.
    Stderr(Vec<u8>),
}

/// Observations shared between a handle and the test that built it.
#[derive(Debug, Default)]
pub struct HandleObserver {
    sent: Mutex<Vec<u8>>,
    closes: AtomicUsize,
    recv_cancels: AtomicUsize,
}

impl HandleObserver {
    /// Everything the connection wrote to the fake worker.
    pub fn sent(&self) -> Vec<u8> {
        lock(&self.sent).clone()
    }

    /// How many times the handle was closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// How many times a receive cancel was issued.
    pub fn recv_cancels(&self) -> usize {
        self.recv_cancels.load(Ordering::SeqCst)
    }
}

/// Holds every send until the test opens it, ignoring cancellation.
#[derive(Debug, Default)]
pub struct SendGate {
    open: Mutex<bool>,
    changed: Condvar,
    entered: AtomicBool,
}

impl SendGate {
    /// Returns true once a send is waiting at the gate.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Releases waiting and future sends.
    pub fn open(&self) {
        *lock(&self.open) = true;
        self.changed.notify_all();
    }

    fn pass(&self) {
        self.entered.store(true, Ordering::SeqCst);
        let open = lock(&self.open);
        drop(
            self.changed
                .wait_while(open, |open| !*open)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

/// Replays scripted stdout and stderr output.
///
/// The handle reports itself alive until the script is exhausted, or until
/// cancelled when built with [`ScriptedHandle::held_open`].
#[derive(Debug)]
pub struct ScriptedHandle {
    script: Mutex<VecDeque<Step>>,
    hold_open: bool,
    cancelled: AtomicBool,
    accept_limit: Option<usize>,
    gate: Option<Arc<SendGate>>,
    observer: Arc<HandleObserver>,
}

impl ScriptedHandle {
    /// Creates a handle that replays `steps` and then reports EOF.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            hold_open: false,
            cancelled: AtomicBool::new(false),
            accept_limit: None,
            gate: None,
            observer: Arc::new(HandleObserver::default()),
        }
    }

    /// Creates a handle whose stdout is a single chunk.
    pub fn with_stdout(bytes: &[u8]) -> Self {
        Self::new([Step::Stdout(bytes.to_vec())])
    }

    /// Keeps the handle alive after the script ends until `cancel_recv`.
    #[must_use]
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Accepts at most `limit` bytes per send.
    #[must_use]
    pub fn accepting(mut self, limit: usize) -> Self {
        self.accept_limit = Some(limit);
        self
    }

    /// Blocks each send at `gate` while it holds the handle lock.
    #[must_use]
    pub fn gated(mut self, gate: Arc<SendGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Returns the observer for later assertions.
    pub fn observer(&self) -> Arc<HandleObserver> {
        Arc::clone(&self.observer)
    }

    fn script_done(&self) -> bool {
        lock(&self.script).is_empty()
    }
}

impl ProcessHandle for ScriptedHandle {
    fn send(&self, cancel: &AtomicBool, bytes: &[u8]) -> io::Result<usize> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if cancel.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let accepted = self.accept_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        let written = bytes.get(..accepted).unwrap_or_default();
        lock(&self.observer.sent).extend_from_slice(written);
        Ok(accepted)
    }

    fn recv(&self, out: &mut [u8], diagnostics: &mut Vec<u8>) -> io::Result<usize> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut script = lock(&self.script);
        while let Some(step) = script.pop_front() {
            match step {
                Step::Stderr(bytes) => diagnostics.extend_from_slice(&bytes),
                Step::Stdout(mut bytes) => {
                    let count = out.len().min(bytes.len());
                    let rest = bytes.split_off(count);
                    out.get_mut(..count)
                        .unwrap_or_default()
                        .copy_from_slice(&bytes);
                    if !rest.is_empty() {
                        script.push_front(Step::Stdout(rest));
                    }
                    return Ok(count);
                }
            }
        }
        drop(script);
        if self.hold_open {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(0)
    }

    fn cancel_recv(&self) {
        self.observer.recv_cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && (self.hold_open || !self.script_done())
    }

    fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.observer.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn pid(&self) -> u32 {
        4242
    }
}
