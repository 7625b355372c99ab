//! Identity index: identity → buffer entry, partitioned by shard
//!
//! Each shard holds a [`Bucket`]. Lookups work on a shared guard; creation
//! requires the exclusive guard for the whole check-then-insert, which is
//! what keeps a single entry per identity even when first writers race.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLockWriteGuard;

use crate::entry::BufferEntry;
use crate::error::{Result, StoreError};
use crate::identity::Identity;
use crate::readiness::Wake;
use crate::shard::{LockDiscipline, ShardGuard, ShardTable};

/// Entries of one shard
#[derive(Debug, Default)]
pub struct Bucket {
    entries: HashMap<Identity, BufferEntry>,
}

impl Bucket {
    #[must_use]
    pub fn find(&self, identity: Identity) -> Option<&BufferEntry> {
        self.entries.get(&identity)
    }

    pub fn find_mut(&mut self, identity: Identity) -> Option<&mut BufferEntry> {
        self.entries.get_mut(&identity)
    }

    /// Return the entry of `identity`, allocating it if absent
    ///
    /// # Errors
    /// `OutOfMemory` if the entry or the map slot cannot be allocated;
    /// the bucket is unchanged in that case.
    pub fn find_or_create(
        &mut self,
        identity: Identity,
        initial_capacity: usize,
    ) -> Result<&mut BufferEntry> {
        if !self.entries.contains_key(&identity) {
            self.entries
                .try_reserve(1)
                .map_err(|_| StoreError::OutOfMemory {
                    requested: std::mem::size_of::<BufferEntry>(),
                })?;
        }
        match self.entries.entry(identity) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let entry = BufferEntry::allocate(identity, initial_capacity)?;
                log::debug!("index: created entry for {identity} ({initial_capacity} bytes)");
                Ok(slot.insert(entry))
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, waking its blocked readers with hang-up
    pub fn drain(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.waiters().wake_all(Wake::HangUp);
        }
        count
    }
}

/// The sharded identity index
pub struct IdentityIndex {
    table: ShardTable<Bucket>,
}

impl IdentityIndex {
    #[must_use]
    pub fn new(shard_bits: u32, discipline: LockDiscipline) -> Self {
        Self {
            table: ShardTable::new(shard_bits, discipline),
        }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.table.len()
    }

    /// Lock the bucket of `identity` for lookups
    pub async fn lock_shared(&self, identity: Identity) -> ShardGuard<'_, Bucket> {
        self.table.lock_shared(identity).await
    }

    /// Lock the bucket of `identity` for creation and mutation
    pub async fn lock_exclusive(&self, identity: Identity) -> RwLockWriteGuard<'_, Bucket> {
        self.table.lock_exclusive(identity).await
    }

    /// Drain every bucket in shard order; returns the number of entries freed
    pub async fn drain_all(&self) -> usize {
        let mut freed = 0;
        for index in 0..self.table.len() {
            let mut bucket = self.table.lock_index(index).await;
            freed += bucket.drain();
        }
        freed
    }
}
