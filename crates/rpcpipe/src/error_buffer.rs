//! Bounded capture of the worker's diagnostic output.
//!
//! Workers tend to write freely to stderr. The buffer keeps only the most
//! recent output: when an append would exceed the capacity, the oldest half
//! of the capacity is evicted first, so after any overflow the buffer holds
//! between half and all of its capacity of the newest bytes.

use std::collections::VecDeque;

/// Default diagnostic capacity (4 MiB).
pub const DEFAULT_STDERR_CAPACITY: usize = 4 * 1024 * 1024;

/// Ring buffer holding the most recent diagnostic bytes.
#[derive(Debug, Clone)]
pub struct ErrorBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl ErrorBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            capacity,
        }
    }

    /// Maximum number of bytes retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true when nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends diagnostic bytes, evicting the oldest half on overflow.
    ///
    /// A single chunk larger than the capacity keeps only its newest
    /// `capacity` bytes.
    pub fn append(&mut self, incoming: &[u8]) {
        if incoming.is_empty() || self.capacity == 0 {
            return;
        }

        let kept = incoming
            .len()
            .checked_sub(self.capacity)
            .and_then(|skip| incoming.get(skip..))
            .unwrap_or(incoming);

        let half = self.capacity.div_euclid(2).max(1);
        while !self.bytes.is_empty() && self.bytes.len() + kept.len() > self.capacity {
            let evict = half.min(self.bytes.len());
            self.bytes.drain(..evict);
        }

        self.bytes.extend(kept);
    }

    /// Copies the retained bytes, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }

    /// Returns the retained bytes as text, replacing invalid UTF-8.
    #[must_use]
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }
}

impl Default for ErrorBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_CAPACITY)
    }
}
