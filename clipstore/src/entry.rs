//! Buffer entry: the growable byte buffer owned by one identity
//!
//! # Invariants
//!
//! - `data.len()` is the capacity; `length <= capacity`
//! - bytes in `[length, capacity)` are zero
//! - the entry is only reachable through its shard, so `&mut` access means
//!   the shard is held exclusively
//!
//! Counters are atomics so that reads can count under a shared lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};
use crate::growth;
use crate::identity::Identity;
use crate::readiness::WaitQueue;
use crate::transfer::ByteSink;

pub struct BufferEntry {
    identity: Identity,
    data: Vec<u8>,
    length: usize,
    reads: AtomicU64,
    writes: AtomicU64,
    waiters: WaitQueue,
}

impl BufferEntry {
    /// Allocate an empty, zero-filled entry
    ///
    /// # Errors
    /// `OutOfMemory` if the buffer cannot be allocated.
    pub fn allocate(identity: Identity, capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| StoreError::OutOfMemory {
                requested: capacity,
            })?;
        data.resize(capacity, 0);

        Ok(Self {
            identity,
            data,
            length: 0,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            waiters: WaitQueue::new(),
        })
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Logical size
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Allocated size
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The logical contents, `[0, length)`
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// All allocated bytes, `[0, capacity)`
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Number of reads that returned data
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful writes
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Copy `bytes` in at `offset`, growing the buffer first if needed
    ///
    /// Gaps between the old length and `offset` read as zero. On error
    /// nothing changes.
    ///
    /// # Errors
    /// `CapacityExceeded` when the end would pass `max_capacity`,
    /// `OutOfMemory` when growth cannot allocate.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8], max_capacity: usize) -> Result<usize> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or(StoreError::CapacityExceeded {
                required: usize::MAX,
                max: max_capacity,
            })?;

        if end > self.capacity() {
            let new_capacity = growth::next_capacity(self.capacity(), end, max_capacity)?;
            growth::grow(&mut self.data, self.length, new_capacity)?;
        }

        self.data[offset..end].copy_from_slice(bytes);
        self.length = self.length.max(end);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(bytes.len())
    }

    /// Copy up to `dst.len()` bytes starting at `offset` into `dst`
    ///
    /// Returns 0 when `offset` is at or past the end of data.
    ///
    /// # Errors
    /// `TransferFault` if `dst` rejects the copy.
    pub fn read_at<S: ByteSink + ?Sized>(&self, offset: usize, dst: &mut S) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let count = dst.len().min(self.length - offset);
        if count == 0 {
            return Ok(0);
        }
        dst.copy_in(&self.data[offset..offset + count])?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Drop all data: length becomes 0 and every byte is zeroed
    ///
    /// Capacity is kept.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.length = 0;
    }
}

impl fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferEntry(identity={}, length={}, capacity={}, reads={}, writes={}, waiters={})",
            self.identity,
            self.length,
            self.capacity(),
            self.reads(),
            self.writes(),
            self.waiters.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BufferEntry {
        BufferEntry::allocate(Identity::new(1000), 16).unwrap()
    }

    #[test]
    fn test_new_entry_is_empty_and_zeroed() {
        let e = entry();
        assert!(e.is_empty());
        assert_eq!(e.capacity(), 16);
        assert!(e.raw().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_then_read() {
        let mut e = entry();
        assert_eq!(e.write_at(0, b"hello", 1024).unwrap(), 5);

        let mut buf = [0u8; 10];
        let n = e.read_at(0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(e.reads(), 1);
        assert_eq!(e.writes(), 1);
    }

    #[test]
    fn test_gap_reads_as_zero() {
        let mut e = entry();
        e.write_at(0, b"ab", 1024).unwrap();
        e.write_at(6, b"cd", 1024).unwrap();
        assert_eq!(e.contents(), b"ab\0\0\0\0cd");
    }

    #[test]
    fn test_overwrite_keeps_length() {
        let mut e = entry();
        e.write_at(0, b"abcdef", 1024).unwrap();
        e.write_at(1, b"XY", 1024).unwrap();
        assert_eq!(e.contents(), b"aXYdef");
    }

    #[test]
    fn test_growth_failure_leaves_entry_untouched() {
        let mut e = entry();
        e.write_at(0, b"keep", 1024).unwrap();

        let big = vec![7u8; 40];
        let err = e.write_at(4, &big, 32).unwrap_err();
        assert_eq!(
            err,
            StoreError::CapacityExceeded {
                required: 44,
                max: 32
            }
        );
        assert_eq!(e.len(), 4);
        assert_eq!(e.capacity(), 16);
        assert_eq!(e.contents(), b"keep");
        assert_eq!(e.writes(), 1);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut e = entry();
        e.write_at(0, b"abc", 1024).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(e.read_at(3, &mut buf).unwrap(), 0);
        assert_eq!(e.read_at(1000, &mut buf).unwrap(), 0);
        assert_eq!(e.reads(), 0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut e = entry();
        e.write_at(0, &[1u8; 40], 1024).unwrap();
        assert_eq!(e.capacity(), 64);
        e.clear();
        assert_eq!(e.len(), 0);
        assert_eq!(e.capacity(), 64);
        assert!(e.raw().iter().all(|&b| b == 0));
    }
}
