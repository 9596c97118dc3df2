//! Layered configuration for processes hosting an rpcpipe connection.
//!
//! Values resolve from built-in defaults, then a configuration file, then
//! `RPCPIPE_*` environment variables, then command-line flags. The resolved
//! [`Config`] carries logging settings for the host and the connection
//! tunables that [`Config::connection_config`] applies to a worker command.

mod defaults;
mod logging;

use std::ffi::OsString;
use std::time::Duration;

use rpcpipe::{ConnectionConfig, ConnectionTuning};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DRAIN_TIMEOUT_MS, default_close_timeout_ms, default_drain_timeout_ms,
    default_poll_interval_ms, default_send_timeout_ms, default_shutdown_timeout_ms,
    default_stderr_capacity,
};
pub use logging::{DEFAULT_LOG_FILTER, LogFormat, default_log_filter_string, default_log_format};
pub use ortho_config::OrthoConfig;

/// Resolved settings for an rpcpipe host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "RPCPIPE")]
pub struct Config {
    /// `tracing` filter expression, for example `info,rpcpipe::reader=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log records.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Milliseconds a send waits for the handle lock.
    #[ortho_config(default = default_send_timeout_ms())]
    pub send_timeout_ms: u64,
    /// Milliseconds a shutdown waits for the handle lock.
    #[ortho_config(default = default_shutdown_timeout_ms())]
    pub shutdown_timeout_ms: u64,
    /// Milliseconds the dispatch loop waits for the handle lock when closing.
    #[ortho_config(default = default_close_timeout_ms())]
    pub close_timeout_ms: u64,
    /// Milliseconds between liveness checks while reading or writing.
    #[ortho_config(default = default_poll_interval_ms())]
    pub poll_interval_ms: u64,
    /// Bytes of worker stderr retained for diagnostics.
    #[ortho_config(default = default_stderr_capacity())]
    pub stderr_capacity: usize,
    /// Milliseconds a host waits for the worker to finish once its own input ends.
    #[ortho_config(default = default_drain_timeout_ms())]
    pub drain_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            send_timeout_ms: default_send_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stderr_capacity: default_stderr_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Errors raised while turning configuration into a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No worker command was supplied.
    #[error("no worker command given")]
    MissingCommand,
}

impl Config {
    /// Filter expression for the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Format used for log output.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Connection tunables derived from the configured values.
    #[must_use]
    pub const fn tuning(&self) -> ConnectionTuning {
        ConnectionTuning {
            send_lock_timeout: Duration::from_millis(self.send_timeout_ms),
            shutdown_lock_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            close_lock_timeout: Duration::from_millis(self.close_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            write_chunk_size: rpcpipe::DEFAULT_WRITE_CHUNK_SIZE,
            stderr_capacity: self.stderr_capacity,
        }
    }

    /// Grace period granted to the worker after the host's input ends.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Builds the connection settings for the worker described by `argv`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCommand`] when `argv` is empty.
    pub fn connection_config<I, S>(&self, argv: I) -> Result<ConnectionConfig, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        ConnectionConfig::from_argv(argv)
            .map(|config| config.with_tuning(self.tuning()))
            .ok_or(ConfigError::MissingCommand)
    }
}
