//! Blocking readiness
//!
//! Every buffer entry owns a [`WaitQueue`]. A blocking reader that finds no
//! data registers itself and waits; every successful write wakes all
//! registered readers.
//!
//! # Avoiding lost wake-ups
//!
//! The condition ("is there data past my offset?") and the registration
//! must be atomic with respect to writers. The workflow is:
//!
//! 10. Reader: lock the shard (shared)
//! 20. Reader: check `offset < length`
//! 30. Reader: `register` on the entry's wait queue
//! 40. Reader: release the shard lock, then await the registration
//!
//! 50. Writer: lock the shard (exclusive), update the buffer and length
//! 60. Writer: `wake_all`
//!
//! A writer can only change `length` while it holds the shard exclusively,
//! which it cannot do between steps 10 and 40. So either the reader sees
//! the new length in step 20, or it is registered before step 60 runs.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tokio::sync::oneshot;

/// Why a waiter was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// New data was written
    DataAvailable,
    /// The store is shutting down
    HangUp,
}

/// Represents a client waiting on an entry
struct WaitingClient {
    sender: oneshot::Sender<Wake>,
    debug_hint: String,
}

impl fmt::Debug for WaitingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingClient")
            .field("debug_hint", &self.debug_hint)
            .finish_non_exhaustive()
    }
}

/// Per-entry wait primitive
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiting: Mutex<Vec<WaitingClient>>,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter
    ///
    /// Precondition: the caller holds the entry's shard lock and has just
    /// checked that it must wait. Release the shard lock before awaiting the
    /// returned receiver.
    ///
    /// Waiters that gave up (interrupted readers) are pruned here.
    pub fn register(&self, debug_hint: &str) -> oneshot::Receiver<Wake> {
        let (tx, rx) = oneshot::channel();
        let mut waiting = self.waiting.lock();
        waiting.retain(|client| !client.sender.is_closed());
        waiting.push(WaitingClient {
            sender: tx,
            debug_hint: debug_hint.to_string(),
        });
        rx
    }

    /// Wake every registered waiter; returns how many were still listening
    pub fn wake_all(&self, reason: Wake) -> usize {
        let waiters = std::mem::take(&mut *self.waiting.lock());
        if waiters.is_empty() {
            return 0;
        }

        log::debug!("waitq.wake_all: reason={reason:?}, waiters: {}", waiters.len());

        let mut woken = 0;
        for waiter in waiters {
            if waiter.sender.send(reason).is_err() {
                log::debug!(
                    "waitq.wake_all: waiter went away (hint: {})",
                    waiter.debug_hint
                );
            } else {
                woken += 1;
            }
        }
        woken
    }

    /// Number of registered waiters, including ones that already gave up
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

/// Readiness of a session, computed without blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollMask(u8);

impl PollMask {
    pub const READABLE: PollMask = PollMask(0b0001);
    pub const WRITABLE: PollMask = PollMask(0b0010);
    pub const ERROR: PollMask = PollMask(0b0100);
    pub const HANGUP: PollMask = PollMask(0b1000);

    #[must_use]
    pub const fn empty() -> Self {
        PollMask(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: PollMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }
}

impl BitOr for PollMask {
    type Output = PollMask;

    fn bitor(self, rhs: PollMask) -> PollMask {
        PollMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollMask {
    fn bitor_assign(&mut self, rhs: PollMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PollMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READABLE, "IN"),
            (Self::WRITABLE, "OUT"),
            (Self::ERROR, "ERR"),
            (Self::HANGUP, "HUP"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

#[cfg(test)]
#[path = "tests/readiness.rs"]
mod tests;
