//! Asynchronous subscriber registry
//!
//! Out-of-band "data changed" signaling, independent of blocking reads.
//! Per identity, the registry keeps the sinks of the sessions that
//! subscribed. A sink is a bounded channel owned by its session; delivery
//! uses `try_send`, so a slow or vanished subscriber never blocks the
//! writer or the other subscribers.
//!
//! The registry is sharded like the identity index, with its own locks.
//! A subscriber record with no sinks is removed immediately.
//!
//! The registry holds the only strong sender of each sink. Teardown tries
//! to queue a `HangUp` and then drops the sender, so a subscriber whose
//! queue was full still observes the end of its channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Result, StoreError};
use crate::identity::Identity;
use crate::idgen::SessionId;
use crate::shard::{LockDiscipline, ShardTable};

/// Event delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The identity's buffer changed
    Changed(Identity),
    /// The store is shutting down; no further events follow
    HangUp,
}

/// A registered notification sink
#[derive(Clone)]
pub struct Sink {
    owner: SessionId,
    sender: mpsc::Sender<Notification>,
}

impl Sink {
    #[must_use]
    pub fn new(owner: SessionId, sender: mpsc::Sender<Notification>) -> Self {
        Self { owner, sender }
    }

    /// Deliver without waiting; failures are logged and swallowed
    fn deliver(&self, event: Notification) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Undelivered events coalesce into the ones already queued
                log::debug!(
                    "subscribers: sink of {:?} is full, event {event:?} coalesced",
                    self.owner
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("subscribers: sink of {:?} is gone", self.owner);
                false
            }
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("owner", &self.owner)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Sinks registered for one identity
#[derive(Debug, Default)]
struct SubscriberEntry {
    sinks: Vec<Sink>,
}

type SubscriberBucket = HashMap<Identity, SubscriberEntry>;

/// Sharded map identity → registered sinks
pub struct SubscriberRegistry {
    table: ShardTable<SubscriberBucket>,
    closed: AtomicBool,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new(shard_bits: u32, discipline: LockDiscipline) -> Self {
        Self {
            table: ShardTable::new(shard_bits, discipline),
            closed: AtomicBool::new(false),
        }
    }

    /// Register `sink` for `identity`
    ///
    /// A sink with the same owner replaces the existing registration.
    /// Returns `true` if a new registration was added.
    ///
    /// # Errors
    /// `ShutDown` once teardown has started; checked under the shard lock,
    /// so no record lands in a shard the sweep already passed.
    pub async fn subscribe(&self, identity: Identity, sink: Sink) -> Result<bool> {
        let mut bucket = self.table.lock_exclusive(identity).await;
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ShutDown);
        }
        let entry = bucket.entry(identity).or_default();
        if let Some(existing) = entry.sinks.iter_mut().find(|s| s.owner == sink.owner) {
            *existing = sink;
            log::debug!("subscribers: {identity} re-subscribed by {:?}", existing.owner);
            return Ok(false);
        }
        log::debug!("subscribers: {identity} subscribed by {:?}", sink.owner);
        entry.sinks.push(sink);
        Ok(true)
    }

    /// Remove the registration of `owner` for `identity`
    ///
    /// Returns `true` if one was removed. The identity's record goes away
    /// with its last sink.
    pub async fn unsubscribe(&self, identity: Identity, owner: SessionId) -> bool {
        let mut bucket = self.table.lock_exclusive(identity).await;
        let Some(entry) = bucket.get_mut(&identity) else {
            return false;
        };
        let before = entry.sinks.len();
        entry.sinks.retain(|s| s.owner != owner);
        let removed = entry.sinks.len() != before;
        if entry.sinks.is_empty() {
            bucket.remove(&identity);
        }
        if removed {
            log::debug!("subscribers: {identity} unsubscribed by {owner:?}");
        }
        removed
    }

    /// Send `Changed(identity)` to every sink of `identity`
    ///
    /// Returns how many sinks accepted the event.
    pub async fn notify(&self, identity: Identity) -> usize {
        let bucket = self.table.lock_shared(identity).await;
        let Some(entry) = bucket.get(&identity) else {
            return 0;
        };
        let delivered = entry
            .sinks
            .iter()
            .filter(|sink| sink.deliver(Notification::Changed(identity)))
            .count();
        log::debug!(
            "subscribers.notify: {identity}, delivered {delivered}/{}",
            entry.sinks.len()
        );
        delivered
    }

    /// Number of sinks registered for `identity`
    pub async fn sink_count(&self, identity: Identity) -> usize {
        let bucket = self.table.lock_shared(identity).await;
        bucket.get(&identity).map_or(0, |entry| entry.sinks.len())
    }

    /// Whether `identity` has a subscriber record
    pub async fn has_record(&self, identity: Identity) -> bool {
        self.table.lock_shared(identity).await.contains_key(&identity)
    }

    /// Send `HangUp` to every sink and drop all records, shard by shard in
    /// index order
    ///
    /// Returns the number of records removed. Later subscriptions fail.
    pub async fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut removed = 0;
        for index in 0..self.table.len() {
            let mut bucket = self.table.lock_index(index).await;
            for (identity, entry) in bucket.drain() {
                for sink in &entry.sinks {
                    if !sink.deliver(Notification::HangUp) {
                        log::debug!("subscribers.shutdown: hang-up for {identity} not delivered");
                    }
                }
                removed += 1;
            }
        }
        removed
    }
}
