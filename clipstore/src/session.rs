//! Sessions: an open handle on one identity's buffer
//!
//! A session is bound to the identity given at open time and carries its
//! own offset. Sessions of the same identity share the buffer but not the
//! offset.
//!
//! Writes stage the caller's bytes before any lock is taken, so a faulting
//! source leaves the buffer untouched. Subscribers are notified after the
//! shard lock is released.
//!
//! The session keeps only a weak handle on its notification sender; while
//! subscribed, the registry owns the strong one. The channel therefore ends
//! when the registry lets go of the sink, and a subscription ended by
//! teardown always yields one `HangUp` before the end of the stream.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::control::Command;
use crate::error::{Result, StoreError};
use crate::identity::Identity;
use crate::idgen::SessionId;
use crate::index::Bucket;
use crate::interrupt::Interrupter;
use crate::readiness::{PollMask, Wake};
use crate::store::Store;
use crate::subscribers::{Notification, Sink};
use crate::transfer::{ByteSink, ByteSource};

/// How to open a session, in the manner of `std::fs::OpenOptions`
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    interrupter: Option<Interrupter>,
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Every write lands at the current end of data
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    /// Empty the buffer at open time; needs write access
    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    /// Use `interrupter` for the session's interruptible waits
    pub fn interrupter(&mut self, interrupter: Interrupter) -> &mut Self {
        self.interrupter = Some(interrupter);
        self
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.read
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.write
    }

    #[must_use]
    pub fn is_append(&self) -> bool {
        self.append
    }

    #[must_use]
    pub fn is_truncate(&self) -> bool {
        self.truncate && self.write
    }

    pub(crate) fn interrupter_or_default(&self) -> Interrupter {
        self.interrupter.clone().unwrap_or_default()
    }
}

pub struct Session {
    store: Arc<Store>,
    id: SessionId,
    identity: Identity,
    readable: bool,
    writable: bool,
    append: bool,
    offset: u64,
    dirty: bool,
    subscribed: bool,
    closed: bool,
    interrupter: Interrupter,
    sink_tx: mpsc::WeakSender<Notification>,
    sink_rx: mpsc::Receiver<Notification>,
    sink_capacity: usize,
    hung_up: bool,
}

impl Session {
    pub(crate) fn new(
        store: Arc<Store>,
        id: SessionId,
        identity: Identity,
        options: &OpenOptions,
        interrupter: Interrupter,
        sink_capacity: usize,
    ) -> Self {
        let (tx, sink_rx) = mpsc::channel(sink_capacity);
        let sink_tx = tx.downgrade();
        Self {
            store,
            id,
            identity,
            readable: options.is_readable(),
            writable: options.is_writable(),
            append: options.is_append(),
            offset: 0,
            dirty: false,
            subscribed: false,
            closed: false,
            interrupter,
            sink_tx,
            sink_rx,
            sink_capacity,
            hung_up: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether this session wrote since it was opened
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Handle to interrupt this session's waits from elsewhere
    #[must_use]
    pub fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn check_read<S: ByteSink + ?Sized>(&self, dst: &S) -> Result<()> {
        self.store.ensure_running()?;
        if !self.readable {
            return Err(StoreError::BadHandle("session not opened for reading"));
        }
        if !dst.is_present() {
            return Err(StoreError::InvalidArgument("absent destination region"));
        }
        Ok(())
    }

    /// Copy from the entry at `offset`; 0 if there is nothing to read
    fn read_bucket<S: ByteSink + ?Sized>(
        bucket: &Bucket,
        identity: Identity,
        offset: u64,
        dst: &mut S,
    ) -> Result<usize> {
        let Some(entry) = bucket.find(identity) else {
            return Ok(0);
        };
        match usize::try_from(offset) {
            Ok(offset) => entry.read_at(offset, dst),
            Err(_) => Ok(0),
        }
    }

    /// Read at the session offset without waiting
    ///
    /// Returns 0 at or past the end of data. The offset advances by the
    /// number of bytes returned.
    ///
    /// # Errors
    /// `BadHandle`, `InvalidArgument` for an absent destination,
    /// `TransferFault`, `Interrupted`, `ShutDown`.
    pub async fn read<S: ByteSink + ?Sized>(&mut self, dst: &mut S) -> Result<usize> {
        self.check_read(dst)?;
        let bucket = self.store.lock_shared(self.identity, &self.interrupter).await?;
        let n = Self::read_bucket(&bucket, self.identity, self.offset, dst)?;
        drop(bucket);
        self.offset += n as u64;
        log::debug!("{self:?}: read {n} bytes");
        Ok(n)
    }

    /// Read at the session offset, waiting until data is available
    ///
    /// A zero-length destination returns immediately.
    ///
    /// # Errors
    /// As [`Session::read`]; `ShutDown` if teardown woke the wait.
    pub async fn read_blocking<S: ByteSink + ?Sized>(&mut self, dst: &mut S) -> Result<usize> {
        self.check_read(dst)?;
        loop {
            let wait = {
                let bucket = self.store.lock_shared(self.identity, &self.interrupter).await?;
                let n = Self::read_bucket(&bucket, self.identity, self.offset, dst)?;
                if n > 0 || dst.is_empty() {
                    drop(bucket);
                    self.offset += n as u64;
                    log::debug!("{self:?}: read {n} bytes");
                    return Ok(n);
                }
                match bucket.find(self.identity) {
                    Some(entry) => entry.waiters().register(&format!("{:?}", self.id)),
                    None => return Ok(0),
                }
            };

            log::debug!("{self:?}: waiting for data");
            match self.interrupter.guard(wait).await? {
                Ok(Wake::DataAvailable) => {}
                Ok(Wake::HangUp) | Err(_) => return Err(StoreError::ShutDown),
            }
        }
    }

    /// Write at the session offset, or at the end of data in append mode
    ///
    /// Grows the buffer when needed. Blocked readers are woken and
    /// subscribers notified. Returns the number of bytes written.
    ///
    /// # Errors
    /// `BadHandle`, `InvalidArgument` for an absent source,
    /// `TransferFault`, `CapacityExceeded`, `OutOfMemory`, `Interrupted`,
    /// `ShutDown`. On error nothing was written.
    pub async fn write<S: ByteSource + ?Sized>(&mut self, src: &S) -> Result<usize> {
        self.store.ensure_running()?;
        if !self.writable {
            return Err(StoreError::BadHandle("session not opened for writing"));
        }
        if !src.is_present() {
            return Err(StoreError::InvalidArgument("absent source region"));
        }
        let count = src.len();
        if count == 0 {
            return Ok(0);
        }
        let staged = stage(src)?;

        {
            let mut bucket = self
                .store
                .lock_exclusive(self.identity, &self.interrupter)
                .await?;
            let max_capacity = self.store.max_capacity();
            let entry =
                bucket.find_or_create(self.identity, self.store.config().initial_capacity)?;
            let offset = if self.append {
                entry.len()
            } else {
                usize::try_from(self.offset).map_err(|_| StoreError::CapacityExceeded {
                    required: usize::MAX,
                    max: max_capacity,
                })?
            };
            entry.write_at(offset, &staged, max_capacity)?;
            entry.waiters().wake_all(Wake::DataAvailable);
            self.offset = (offset + count) as u64;
            self.dirty = true;
        }

        log::debug!("{self:?}: wrote {count} bytes");
        self.store.subscribers().notify(self.identity).await;
        Ok(count)
    }

    /// Move the session offset
    ///
    /// Seeking past the end of data is allowed; a later write there leaves
    /// a zero-filled gap.
    ///
    /// # Errors
    /// `Unsupported` for `SeekFrom::End`, `InvalidArgument` if the target
    /// is negative or out of range, `ShutDown`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.store.ensure_running()?;
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| StoreError::InvalidArgument("seek target out of range"))?,
            SeekFrom::Current(delta) => i64::try_from(self.offset)
                .ok()
                .and_then(|current| current.checked_add(delta))
                .ok_or(StoreError::InvalidArgument("seek target out of range"))?,
            SeekFrom::End(_) => {
                return Err(StoreError::Unsupported(
                    "seek relative to end of data".to_string(),
                ))
            }
        };
        self.offset =
            u64::try_from(target).map_err(|_| StoreError::InvalidArgument("negative seek target"))?;
        Ok(self.offset)
    }

    /// `lseek`-style seek: `whence` is 0 (start), 1 (current) or 2 (end)
    ///
    /// # Errors
    /// As [`Session::seek`]; `InvalidArgument` for an unknown `whence`.
    pub fn seek_whence(&mut self, offset: i64, whence: i32) -> Result<u64> {
        let pos = match whence {
            0 => SeekFrom::Start(
                u64::try_from(offset)
                    .map_err(|_| StoreError::InvalidArgument("negative seek target"))?,
            ),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return Err(StoreError::InvalidArgument("unknown seek origin")),
        };
        self.seek(pos)
    }

    fn mask_of(bucket: &Bucket, identity: Identity, offset: u64) -> PollMask {
        match bucket.find(identity) {
            None => PollMask::WRITABLE | PollMask::ERROR,
            Some(entry) if offset < entry.len() as u64 => PollMask::READABLE | PollMask::WRITABLE,
            Some(_) => PollMask::WRITABLE,
        }
    }

    /// Current readiness, without waiting for data
    ///
    /// # Errors
    /// `Interrupted` if the shard lock wait was interrupted.
    pub async fn poll(&self) -> Result<PollMask> {
        match self.store.lock_shared(self.identity, &self.interrupter).await {
            Ok(bucket) => Ok(Self::mask_of(&bucket, self.identity, self.offset)),
            Err(StoreError::ShutDown) => Ok(PollMask::HANGUP),
            Err(err) => Err(err),
        }
    }

    /// Wait until the session is readable or the store hangs up
    ///
    /// # Errors
    /// `Interrupted`.
    pub async fn ready(&self) -> Result<PollMask> {
        loop {
            let wait = {
                let bucket = match self.store.lock_shared(self.identity, &self.interrupter).await {
                    Ok(bucket) => bucket,
                    Err(StoreError::ShutDown) => return Ok(PollMask::HANGUP),
                    Err(err) => return Err(err),
                };
                let mask = Self::mask_of(&bucket, self.identity, self.offset);
                if mask.is_readable() {
                    return Ok(mask);
                }
                match bucket.find(self.identity) {
                    Some(entry) => entry.waiters().register(&format!("{:?} ready", self.id)),
                    None => return Ok(mask),
                }
            };

            match self.interrupter.guard(wait).await? {
                Ok(Wake::DataAvailable) => {}
                Ok(Wake::HangUp) | Err(_) => return Ok(PollMask::HANGUP),
            }
        }
    }

    /// Execute a raw control code
    ///
    /// # Errors
    /// `Unsupported` for an unknown code, otherwise as [`Session::command`].
    pub async fn control(&mut self, code: u32) -> Result<()> {
        let command = Command::try_from(code)?;
        self.command(command).await
    }

    /// Execute a control command
    ///
    /// # Errors
    /// `Interrupted`, `ShutDown`.
    pub async fn command(&mut self, command: Command) -> Result<()> {
        self.store.ensure_running()?;
        log::debug!("{self:?}: command {command:?}");
        match command {
            Command::Clear => {
                self.store.clear(self.identity, &self.interrupter).await?;
            }
            Command::Subscribe => {
                let sink = Sink::new(self.id, self.sink_sender());
                self.interrupter
                    .guard(self.store.subscribers().subscribe(self.identity, sink))
                    .await??;
                self.subscribed = true;
            }
            Command::Unsubscribe => {
                self.interrupter
                    .guard(self.store.subscribers().unsubscribe(self.identity, self.id))
                    .await?;
                self.subscribed = false;
            }
        }
        Ok(())
    }

    /// Empty the identity's buffer, keeping its capacity
    ///
    /// # Errors
    /// `Interrupted`, `ShutDown`.
    pub async fn clear(&mut self) -> Result<()> {
        self.command(Command::Clear).await
    }

    /// Receive change notifications for this identity on the session sink
    ///
    /// # Errors
    /// `Interrupted`, `ShutDown`.
    pub async fn subscribe(&mut self) -> Result<()> {
        self.command(Command::Subscribe).await
    }

    /// # Errors
    /// `Interrupted`, `ShutDown`.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        self.command(Command::Unsubscribe).await
    }

    /// Wait for the next notification on the session sink
    ///
    /// Returns `None` once nothing can arrive any more: the session is not
    /// subscribed, or its subscription ended and the queue is drained.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        let event = self.sink_rx.recv().await;
        self.settle(event)
    }

    pub fn try_next_notification(&mut self) -> Option<Notification> {
        match self.sink_rx.try_recv() {
            Ok(event) => self.settle(Some(event)),
            Err(TryRecvError::Disconnected) => self.settle(None),
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Strong sender for a new registration, reopening the channel if the
    /// previous subscription let it close
    fn sink_sender(&mut self) -> mpsc::Sender<Notification> {
        if let Some(tx) = self.sink_tx.upgrade() {
            return tx;
        }
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        self.sink_rx = rx;
        self.sink_tx = tx.downgrade();
        self.hung_up = false;
        tx
    }

    // A subscribed session sees its channel end only through teardown; if
    // the registry could not queue the hang-up, report it here.
    fn settle(&mut self, event: Option<Notification>) -> Option<Notification> {
        match event {
            Some(Notification::HangUp) => {
                self.hung_up = true;
                Some(Notification::HangUp)
            }
            Some(event) => Some(event),
            None if self.subscribed && !self.hung_up => {
                self.hung_up = true;
                Some(Notification::HangUp)
            }
            None => None,
        }
    }

    /// Close the session
    ///
    /// Drops the session's subscription, then notifies the identity's
    /// subscribers if this session wrote.
    pub async fn close(mut self) {
        self.closed = true;
        log::debug!("{self:?}: close");
        release(
            Arc::clone(&self.store),
            self.identity,
            self.id,
            self.subscribed,
            self.writable && self.dirty,
        )
        .await;
    }
}

/// Copy the caller's bytes out before any lock is taken
fn stage<S: ByteSource + ?Sized>(src: &S) -> Result<Vec<u8>> {
    let len = src.len();
    let mut staged = Vec::new();
    staged
        .try_reserve_exact(len)
        .map_err(|_| StoreError::OutOfMemory { requested: len })?;
    staged.resize(len, 0);
    src.copy_out(&mut staged)?;
    Ok(staged)
}

async fn release(
    store: Arc<Store>,
    identity: Identity,
    id: SessionId,
    subscribed: bool,
    notify: bool,
) {
    if store.is_shut_down() {
        return;
    }
    if subscribed {
        store.subscribers().unsubscribe(identity, id).await;
    }
    if notify {
        store.subscribers().notify(identity).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session(id={}, identity={}, offset={}, dirty={}, subscribed={}, mode={}{}{})",
            self.id.id(),
            self.identity,
            self.offset,
            self.dirty,
            self.subscribed,
            if self.readable { "r" } else { "" },
            if self.writable { "w" } else { "" },
            if self.append { "a" } else { "" },
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed || !(self.subscribed || self.dirty) {
            return;
        }
        let release = release(
            Arc::clone(&self.store),
            self.identity,
            self.id,
            self.subscribed,
            self.writable && self.dirty,
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release);
            }
            Err(_) => {
                log::warn!("{self:?}: dropped outside a runtime without close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferFault;

    #[test]
    fn test_truncate_needs_write() {
        let mut options = OpenOptions::new();
        options.read(true).truncate(true);
        assert!(!options.is_truncate());
        options.write(true);
        assert!(options.is_truncate());
    }

    #[test]
    fn test_stage_copies_source() {
        assert_eq!(stage(&b"abc"[..]).unwrap(), b"abc");
        assert_eq!(
            stage(&None::<&[u8]>),
            Err(StoreError::TransferFault(TransferFault { len: 0 }))
        );
    }
}
