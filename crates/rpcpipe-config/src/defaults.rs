//! Built-in configuration values.

/// Default grace period, in milliseconds, before a host shuts the worker down.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 1000;

/// Default send lock timeout in milliseconds.
#[must_use]
pub fn default_send_timeout_ms() -> u64 {
    duration_ms(rpcpipe::DEFAULT_SEND_LOCK_TIMEOUT)
}

/// Default shutdown lock timeout in milliseconds.
#[must_use]
pub fn default_shutdown_timeout_ms() -> u64 {
    duration_ms(rpcpipe::DEFAULT_SHUTDOWN_LOCK_TIMEOUT)
}

/// Default close lock timeout in milliseconds.
#[must_use]
pub fn default_close_timeout_ms() -> u64 {
    duration_ms(rpcpipe::DEFAULT_CLOSE_LOCK_TIMEOUT)
}

/// Default polling interval in milliseconds.
#[must_use]
pub fn default_poll_interval_ms() -> u64 {
    duration_ms(rpcpipe::DEFAULT_POLL_INTERVAL)
}

/// Default stderr capture capacity in bytes.
#[must_use]
pub const fn default_stderr_capacity() -> usize {
    rpcpipe::DEFAULT_STDERR_CAPACITY
}

/// Default drain timeout in milliseconds.
#[must_use]
pub const fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
