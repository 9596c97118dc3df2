//! BDD test world wrapping a connection over a scripted handle.

use std::sync::Arc;

use crate::config::ConnectionTuning;
use crate::connection::Connection;
use crate::dispatch::DispatchSummary;
use crate::errors::{DispatchError, SendError};
use crate::host::GlobalLock;
use crate::codec::JsonCodec;

use super::Observed;
use super::scripted_handle::{HandleObserver, ScriptedHandle, Step};

/// Shared state exercised by BDD step implementations.
#[derive(Default)]
pub struct TestWorld {
    steps: Vec<Step>,
    connection: Option<Connection<ScriptedHandle>>,
    observer: Option<Arc<HandleObserver>>,
    /// Events delivered to the callback, in order.
    pub events: Vec<Observed>,
    /// Outcome of the last dispatch run.
    pub outcome: Option<Result<DispatchSummary, DispatchError>>,
    /// Outcome of the last send.
    pub send_result: Option<Result<(), SendError>>,
}

impl TestWorld {
    /// Queues stdout bytes for the fake worker.
    pub fn push_stdout(&mut self, bytes: impl Into<Vec<u8>>) {
        self.steps.push(Step::Stdout(bytes.into()));
    }

    /// Queues stderr bytes for the fake worker.
    pub fn push_stderr(&mut self, bytes: impl Into<Vec<u8>>) {
        self.steps.push(Step::Stderr(bytes.into()));
    }

    /// Returns the connection, opening it from the queued script on first use.
    pub fn connection(&mut self) -> &Connection<ScriptedHandle> {
        let steps = std::mem::take(&mut self.steps);
        let observer = &mut self.observer;
        self.connection.get_or_insert_with(|| {
            let handle = ScriptedHandle::new(steps);
            *observer = Some(handle.observer());
            Connection::with_handle(handle, ConnectionTuning::default())
        })
    }

    /// Runs the dispatch loop under a global host lock, recording events.
    pub fn dispatch(&mut self) {
        let host = GlobalLock::new();
        let codec = JsonCodec::<serde_json::Value>::new();
        let mut events = Vec::new();
        let outcome = self
            .connection()
            .run_dispatch_loop(&codec, &host, |event| events.push(Observed::from(event)));
        self.events = events;
        self.outcome = Some(outcome);
    }

    /// Sends `payload` through the connection.
    pub fn send(&mut self, payload: &[u8]) {
        let result = self.connection().send(payload);
        self.send_result = Some(result);
    }

    /// Observations recorded by the handle.
    ///
    /// # Panics
    ///
    /// Panics when no connection has been opened yet.
    pub fn observer(&self) -> &HandleObserver {
        match self.observer.as_deref() {
            Some(observer) => observer,
            None => panic!("connection has not been opened"),
        }
    }

    /// Messages delivered so far.
    pub fn messages(&self) -> Vec<&serde_json::Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Observed::Message(value) => Some(value),
                _ => None,
            })
            .collect()
    }
}
