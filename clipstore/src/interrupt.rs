//! Interruption of blocking waits
//!
//! An [`Interrupter`] plays the role of signal delivery for a session: a
//! posted interruption makes the next interruptible wait of that session
//! (lock acquisition, blocking read, readiness wait) give up with
//! [`StoreError::Interrupted`]. The abandoned wait is dropped before it
//! produced anything, so no shared state is touched.
//!
//! One interruption is consumed by exactly one wait. An interruption posted
//! while nothing waits stays pending until the next wait.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{Result, StoreError};

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicBool,
    notify: Notify,
}

/// Cloneable handle that interrupts the waits of one session
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    inner: Arc<Inner>,
}

impl Interrupter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post an interruption
    pub fn interrupt(&self) {
        self.inner.pending.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Whether an interruption is posted and not yet consumed
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Resolves once an interruption is posted, consuming it
    async fn interrupted(&self) {
        loop {
            if self.inner.pending.swap(false, Ordering::AcqRel) {
                return;
            }
            // A stale permit only costs one extra loop iteration
            self.inner.notify.notified().await;
        }
    }

    /// Run `fut` unless an interruption arrives first
    ///
    /// `fut` must be cancel-safe: when the interruption wins it is dropped
    /// without having taken effect.
    ///
    /// # Errors
    /// Returns `StoreError::Interrupted` if the interruption won.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            () = self.interrupted() => Err(StoreError::Interrupted),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_through() {
        let intr = Interrupter::new();
        let out = intr.guard(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_pending_interrupt_consumed_once() {
        let intr = Interrupter::new();
        intr.interrupt();
        assert!(intr.is_pending());

        let first = intr.guard(std::future::pending::<()>()).await;
        assert_eq!(first, Err(StoreError::Interrupted));
        assert!(!intr.is_pending());

        let second = intr.guard(async { 1 }).await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn test_interrupt_wakes_waiter() {
        let intr = Interrupter::new();
        let remote = intr.clone();

        let waiter = tokio::spawn(async move { intr.guard(std::future::pending::<()>()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        remote.interrupt();

        let res = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("interrupt should wake the waiter")
            .unwrap();
        assert_eq!(res, Err(StoreError::Interrupted));
    }
}
