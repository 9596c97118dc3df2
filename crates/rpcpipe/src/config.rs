//! Configuration for spawning a worker and tuning its connection.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::error_buffer::DEFAULT_STDERR_CAPACITY;

/// Default wait for the handle lock before a send gives up.
pub const DEFAULT_SEND_LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// Default wait for the handle lock during shutdown.
pub const DEFAULT_SHUTDOWN_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for the handle lock when the dispatch loop closes the handle.
pub const DEFAULT_CLOSE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default polling window for blocking reads and write acknowledgements.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default size of each write handed to the worker's stdin.
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Liveness tunables for a connection.
///
/// Correctness only depends on mutual exclusion around the handle. The
/// timeouts bound how long each operation may wait so that cancellation can
/// make progress against an in-flight send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTuning {
    /// Wait for the handle lock before a send fails as unavailable.
    pub send_lock_timeout: Duration,
    /// Wait for the handle lock before shutdown skips the receive cancel.
    pub shutdown_lock_timeout: Duration,
    /// Wait for the handle lock before the dispatch loop abandons the handle.
    pub close_lock_timeout: Duration,
    /// Polling window for reads and write acknowledgements.
    pub poll_interval: Duration,
    /// Size of each chunk written to the worker's stdin.
    pub write_chunk_size: usize,
    /// Number of diagnostic bytes retained.
    pub stderr_capacity: usize,
}

impl Default for ConnectionTuning {
    fn default() -> Self {
        Self {
            send_lock_timeout: DEFAULT_SEND_LOCK_TIMEOUT,
            shutdown_lock_timeout: DEFAULT_SHUTDOWN_LOCK_TIMEOUT,
            close_lock_timeout: DEFAULT_CLOSE_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
        }
    }
}

/// Configuration for spawning a worker process.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The executable path or command name.
    pub command: PathBuf,
    /// Arguments passed to the worker.
    pub args: Vec<OsString>,
    /// Environment variables set for the worker.
    pub env: Vec<(OsString, OsString)>,
    /// Starts the worker with an empty environment before applying `env`.
    pub clear_env: bool,
    /// Working directory for the worker.
    pub working_dir: Option<PathBuf>,
    /// Liveness tunables.
    pub tuning: ConnectionTuning,
}

impl ConnectionConfig {
    /// Creates a configuration for `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            clear_env: false,
            working_dir: None,
            tuning: ConnectionTuning::default(),
        }
    }

    /// Builds a configuration from a full argument vector.
    ///
    /// The first element is the command. Returns `None` for an empty vector.
    #[must_use]
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut parts = argv.into_iter().map(Into::into);
        let command = parts.next()?;
        Some(Self::new(command).with_args(parts))
    }

    /// Appends worker arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable for the worker.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Starts the worker with only the variables given through [`Self::with_env`].
    #[must_use]
    pub fn with_cleared_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Sets a custom working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replaces the liveness tunables.
    #[must_use]
    pub fn with_tuning(mut self, tuning: ConnectionTuning) -> Self {
        self.tuning = tuning;
        self
    }
}
