//! Timed exclusive access to the process handle.
//!
//! The handle is the only state shared between `send`, `shutdown` and the
//! dispatch loop's close step. Access goes through a guard obtained with a
//! bounded wait, and the slot is emptied exactly once when the connection
//! closes. Every acquisition re-checks for an empty slot after the wait.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::errors::HandleUnavailable;
use crate::handle::lock;

struct SlotState<H> {
    handle: Option<Arc<H>>,
    busy: bool,
}

/// Holds the process handle until the connection closes.
pub(crate) struct HandleSlot<H> {
    state: Mutex<SlotState<H>>,
    released: Condvar,
}

impl<H> HandleSlot<H> {
    pub(crate) fn new(handle: H) -> Self {
        Self {
            state: Mutex::new(SlotState {
                handle: Some(Arc::new(handle)),
                busy: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Waits up to `timeout` for exclusive use of the handle.
    pub(crate) fn acquire(&self, timeout: Duration) -> Result<SlotGuard<'_, H>, HandleUnavailable> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .released
            .wait_timeout_while(state, timeout, |current| {
                current.busy && current.handle.is_some()
            })
            .unwrap_or_else(PoisonError::into_inner);

        let handle = state.handle.clone().ok_or(HandleUnavailable::Closed)?;
        if state.busy {
            return Err(HandleUnavailable::TimedOut);
        }
        state.busy = true;
        Ok(SlotGuard { slot: self, handle })
    }

    /// Shares the handle without taking exclusive access.
    ///
    /// Used by the reader, which only performs operations the handle allows
    /// to run alongside a send.
    pub(crate) fn share(&self) -> Option<Arc<H>> {
        lock(&self.state).handle.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.state).handle.is_none()
    }
}

/// Exclusive access to the handle; released on drop.
pub(crate) struct SlotGuard<'a, H> {
    slot: &'a HandleSlot<H>,
    handle: Arc<H>,
}

impl<H> SlotGuard<'_, H> {
    pub(crate) fn handle(&self) -> &H {
        &self.handle
    }

    /// Empties the slot so later acquisitions report the handle as closed.
    pub(crate) fn retire(&self) {
        lock(&self.slot.state).handle = None;
    }
}

impl<H> Drop for SlotGuard<'_, H> {
    fn drop(&mut self) {
        lock(&self.slot.state).busy = false;
        self.slot.released.notify_all();
    }
}
