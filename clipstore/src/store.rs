//! The buffer store
//!
//! A `Store` owns the sharded identity index, the subscriber registry and
//! the runtime-adjustable capacity ceiling. Sessions hold it through an
//! `Arc`, so several independent stores can live in one process.
//!
//! # Teardown
//!
//! [`Store::shutdown`] marks the store as shut down, then sweeps the index
//! shard by shard in index order, then the subscriber registry the same
//! way. Every operation re-checks the shut-down mark after it acquired its
//! shard lock, so nothing can be created in a shard the sweep already
//! emptied.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLockWriteGuard;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::entry::BufferEntry;
use crate::error::{ConfigError, Result, StoreError};
use crate::identity::Identity;
use crate::idgen::IdGen;
use crate::index::{Bucket, IdentityIndex};
use crate::interrupt::Interrupter;
use crate::session::{OpenOptions, Session};
use crate::shard::ShardGuard;
use crate::subscribers::SubscriberRegistry;

/// Counters and sizes of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    pub length: usize,
    pub capacity: usize,
    pub reads: u64,
    pub writes: u64,
}

/// What a teardown released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub entries: usize,
    pub subscribers: usize,
}

pub struct Store {
    config: StoreConfig,
    max_capacity: AtomicUsize,
    index: IdentityIndex,
    subscribers: SubscriberRegistry,
    ids: IdGen,
    shut_down: AtomicBool,
}

impl Store {
    /// Create a store
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the configuration does not validate.
    pub fn new(config: StoreConfig) -> std::result::Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self::build(config)))
    }

    /// Create a store with the default configuration
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self::build(StoreConfig::default()))
    }

    fn build(config: StoreConfig) -> Self {
        let index = IdentityIndex::new(config.shard_bits, config.lock_discipline);
        info!(
            shards = index.shard_count(),
            initial_capacity = config.initial_capacity,
            max_capacity = config.max_capacity,
            discipline = ?config.lock_discipline,
            "store created"
        );
        Self {
            max_capacity: AtomicUsize::new(config.max_capacity),
            subscribers: SubscriberRegistry::new(config.shard_bits, config.lock_discipline),
            index,
            ids: IdGen::new(),
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current growth ceiling in bytes
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity.load(Ordering::Acquire)
    }

    /// Change the growth ceiling
    ///
    /// Existing buffers are not shrunk; the new ceiling bounds later growth.
    ///
    /// # Errors
    /// `PermissionDenied` unless `caller` is the administrative identity,
    /// `InvalidArgument` if `bytes` is below the initial capacity.
    pub fn set_max_capacity(&self, caller: Identity, bytes: usize) -> Result<()> {
        if !caller.is_admin() {
            warn!(%caller, bytes, "rejected max capacity change");
            return Err(StoreError::PermissionDenied);
        }
        if bytes < self.config.initial_capacity {
            return Err(StoreError::InvalidArgument("max capacity below initial capacity"));
        }
        let old = self.max_capacity.swap(bytes, Ordering::AcqRel);
        info!(old, new = bytes, "max capacity changed");
        Ok(())
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(StoreError::ShutDown);
        }
        Ok(())
    }

    pub(crate) fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Lock the bucket of `identity` for reading, interruptibly
    pub(crate) async fn lock_shared(
        &self,
        identity: Identity,
        interrupter: &Interrupter,
    ) -> Result<ShardGuard<'_, Bucket>> {
        self.ensure_running()?;
        let guard = interrupter.guard(self.index.lock_shared(identity)).await?;
        self.ensure_running()?;
        Ok(guard)
    }

    /// Lock the bucket of `identity` for mutation, interruptibly
    pub(crate) async fn lock_exclusive(
        &self,
        identity: Identity,
        interrupter: &Interrupter,
    ) -> Result<RwLockWriteGuard<'_, Bucket>> {
        self.ensure_running()?;
        let guard = interrupter.guard(self.index.lock_exclusive(identity)).await?;
        self.ensure_running()?;
        Ok(guard)
    }

    /// Open a session for `identity`
    ///
    /// Creates the identity's entry if needed; with `truncate` the entry is
    /// emptied (capacity is kept).
    ///
    /// # Errors
    /// `InvalidArgument` if neither read nor write access is requested,
    /// `OutOfMemory` if the entry cannot be allocated, `Interrupted`,
    /// `ShutDown`.
    pub async fn open(
        self: &Arc<Self>,
        identity: Identity,
        options: &OpenOptions,
    ) -> Result<Session> {
        if !options.is_readable() && !options.is_writable() {
            return Err(StoreError::InvalidArgument("open needs read or write access"));
        }
        let interrupter = options.interrupter_or_default();
        {
            let mut bucket = self.lock_exclusive(identity, &interrupter).await?;
            let entry = bucket.find_or_create(identity, self.config.initial_capacity)?;
            if options.is_truncate() {
                entry.clear();
            }
        }

        let id = self.ids.get_next();
        log::debug!("store.open: {identity} as {id:?} ({options:?})");
        Ok(Session::new(
            Arc::clone(self),
            id,
            identity,
            options,
            interrupter,
            self.config.notify_channel_capacity,
        ))
    }

    /// Empty the buffer of `identity`, keeping its capacity
    ///
    /// Returns `false` (and creates nothing) if the identity has no entry.
    ///
    /// # Errors
    /// `Interrupted`, `ShutDown`.
    pub async fn clear(&self, identity: Identity, interrupter: &Interrupter) -> Result<bool> {
        let mut bucket = self.lock_exclusive(identity, interrupter).await?;
        match bucket.find_mut(identity) {
            Some(entry) => {
                entry.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run `f` against the entry of `identity` under a shared lock
    pub async fn inspect<R>(
        &self,
        identity: Identity,
        f: impl FnOnce(&BufferEntry) -> R,
    ) -> Option<R> {
        let bucket = self.index.lock_shared(identity).await;
        bucket.find(identity).map(f)
    }

    pub async fn stats(&self, identity: Identity) -> Option<EntryStats> {
        self.inspect(identity, |entry| EntryStats {
            length: entry.len(),
            capacity: entry.capacity(),
            reads: entry.reads(),
            writes: entry.writes(),
        })
        .await
    }

    /// Number of notification sinks registered for `identity`
    pub async fn subscriber_count(&self, identity: Identity) -> usize {
        self.subscribers.sink_count(identity).await
    }

    /// Tear the store down
    ///
    /// Must be the last operation on the store: every session operation
    /// afterwards fails with `ShutDown`. Blocked readers are woken and
    /// subscribers receive a hang-up.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            warn!("store shutdown requested twice");
            return ShutdownReport::default();
        }
        info!("store shutting down");

        let entries = self.index.drain_all().await;
        let subscribers = self.subscribers.shutdown().await;

        info!(entries, subscribers, "store shut down");
        ShutdownReport {
            entries,
            subscribers,
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store(shards={}, max_capacity={}, discipline={:?}, shut_down={})",
            self.index.shard_count(),
            self.max_capacity(),
            self.config.lock_discipline,
            self.is_shut_down()
        )
    }
}
