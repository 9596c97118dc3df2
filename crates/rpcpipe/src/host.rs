//! Serialisation contract with the embedding host.
//!
//! Hosts that run their own state under one exclusive lock need two things
//! from the transport: blocking I/O must happen with that lock released, and
//! every callback must run with it held, exactly like any other event the
//! host processes. [`Host::serialized`] is the hook the dispatch loop uses to
//! re-enter the host; [`HostGuard::unlocked`] is the hook host code uses to
//! step out of the lock around a blocking `send`.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Runs work inside the host's serialised execution context.
pub trait Host {
    /// Runs `work` with host exclusivity held.
    fn serialized<T>(&self, work: impl FnOnce() -> T) -> T;
}

/// A host with no global lock; callbacks run on the dispatch thread as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unserialized;

impl Host for Unserialized {
    fn serialized<T>(&self, work: impl FnOnce() -> T) -> T {
        work()
    }
}

/// A single host-wide exclusive lock.
#[derive(Debug, Default)]
pub struct GlobalLock {
    inner: Mutex<()>,
}

impl GlobalLock {
    /// Creates an unlocked host lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Blocks until the host lock is held by the caller.
    #[must_use]
    pub fn acquire(&self) -> HostGuard<'_> {
        HostGuard {
            lock: self,
            held: Some(self.take()),
        }
    }

    fn take(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Host for GlobalLock {
    fn serialized<T>(&self, work: impl FnOnce() -> T) -> T {
        let _guard = self.acquire();
        work()
    }
}

/// Proof that the caller holds the host lock.
pub struct HostGuard<'a> {
    lock: &'a GlobalLock,
    held: Option<MutexGuard<'a, ()>>,
}

impl HostGuard<'_> {
    /// Releases the host lock while `work` runs and takes it back afterwards.
    ///
    /// Use this around blocking calls such as `Connection::send` so callbacks
    /// and other host events can proceed in the meantime.
    pub fn unlocked<T>(&mut self, work: impl FnOnce() -> T) -> T {
        drop(self.held.take());
        let result = work();
        self.held = Some(self.lock.take());
        result
    }
}

impl std::fmt::Debug for HostGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostGuard")
            .field("held", &self.held.is_some())
            .finish()
    }
}
