//! Shard lock table
//!
//! A fixed array of `1 << bits` locks, each guarding one partition of the
//! identity space. An identity always maps to the same shard (see
//! [`Identity::bucket`]), so operations on identities in different shards
//! never contend.
//!
//! Two disciplines are supported:
//!
//! - [`LockDiscipline::Exclusive`]: every operation takes the shard
//!   exclusively, as a plain mutex would.
//! - [`LockDiscipline::ReadWrite`]: lookups and reads share the shard,
//!   mutations take it exclusively.
//!
//! Acquisition futures are cancel-safe, which is what makes them
//! interruptible through [`crate::interrupt::Interrupter::guard`].

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::identity::Identity;

/// Locking discipline of a shard table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDiscipline {
    /// One mutual-exclusion lock per shard
    Exclusive,
    /// Reader/writer lock per shard
    #[default]
    ReadWrite,
}

/// Guard returned by [`ShardTable::lock_shared`]
///
/// Holds the read half under `ReadWrite` and the write half under
/// `Exclusive`; either way it only gives shared access.
pub enum ShardGuard<'a, T> {
    Shared(RwLockReadGuard<'a, T>),
    Exclusive(RwLockWriteGuard<'a, T>),
}

impl<T> Deref for ShardGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            ShardGuard::Shared(guard) => &**guard,
            ShardGuard::Exclusive(guard) => &**guard,
        }
    }
}

/// Fixed array of independently locked shards
pub struct ShardTable<T> {
    shards: Box<[RwLock<T>]>,
    bits: u32,
    discipline: LockDiscipline,
}

impl<T: Default> ShardTable<T> {
    #[must_use]
    pub fn new(bits: u32, discipline: LockDiscipline) -> Self {
        let shards = (0..1usize << bits)
            .map(|_| RwLock::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            bits,
            discipline,
        }
    }
}

impl<T> ShardTable<T> {
    /// Number of shards
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `identity`
    #[must_use]
    pub fn shard_of(&self, identity: Identity) -> usize {
        identity.bucket(self.bits)
    }

    /// Lock the shard of `identity` for lookups and reads
    pub async fn lock_shared(&self, identity: Identity) -> ShardGuard<'_, T> {
        let shard = &self.shards[self.shard_of(identity)];
        match self.discipline {
            LockDiscipline::ReadWrite => ShardGuard::Shared(shard.read().await),
            LockDiscipline::Exclusive => ShardGuard::Exclusive(shard.write().await),
        }
    }

    /// Lock the shard of `identity` for mutation
    pub async fn lock_exclusive(&self, identity: Identity) -> RwLockWriteGuard<'_, T> {
        self.shards[self.shard_of(identity)].write().await
    }

    /// Lock shard `index` for mutation; used by the ordered teardown sweep
    pub async fn lock_index(&self, index: usize) -> RwLockWriteGuard<'_, T> {
        self.shards[index].write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_table_size() {
        let table: ShardTable<u32> = ShardTable::new(10, LockDiscipline::ReadWrite);
        assert_eq!(table.len(), 1024);
        let single: ShardTable<u32> = ShardTable::new(0, LockDiscipline::Exclusive);
        assert_eq!(single.len(), 1);
        assert_eq!(single.shard_of(Identity::new(42)), 0);
    }

    #[tokio::test]
    async fn test_read_write_allows_concurrent_readers() {
        let table: ShardTable<u32> = ShardTable::new(0, LockDiscipline::ReadWrite);
        let a = table.lock_shared(Identity::new(1)).await;
        let second = table.lock_shared(Identity::new(2));
        let b = tokio::time::timeout(Duration::from_millis(50), second)
            .await
            .expect("second reader must not block");
        assert_eq!(*a + *b, 0);
    }

    #[tokio::test]
    async fn test_exclusive_serializes_readers() {
        let table: ShardTable<u32> = ShardTable::new(0, LockDiscipline::Exclusive);
        let _a = table.lock_shared(Identity::new(1)).await;
        let second = table.lock_shared(Identity::new(2));
        let b = tokio::time::timeout(Duration::from_millis(50), second).await;
        assert!(b.is_err(), "exclusive discipline must serialize readers");
    }

    #[tokio::test]
    async fn test_writer_excludes_reader() {
        let table: ShardTable<u32> = ShardTable::new(0, LockDiscipline::ReadWrite);
        let mut w = table.lock_exclusive(Identity::new(1)).await;
        *w = 5;
        let reader = table.lock_shared(Identity::new(1));
        let r = tokio::time::timeout(Duration::from_millis(50), reader).await;
        assert!(r.is_err());
        drop(w);
        assert_eq!(*table.lock_shared(Identity::new(1)).await, 5);
    }
}
