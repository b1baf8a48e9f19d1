//! Bounded reassembly buffer for out-of-order block completion.
//!
//! Fetch tasks append chunks for their block index as they arrive off
//! the network; the flush cursor removes whole entries in index order
//! once they are complete. Capacity is enforced structurally: a fetch
//! task acquires an owned semaphore permit before it is admitted, and
//! the permit is stored in the entry on completion so it is released
//! only when the entry is flushed (or reverted).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

/// Error returned by [`ReassemblyBuffer::put`] after the session has
/// reached a terminal aborted state.
#[derive(Debug, Error)]
#[error("reassembly buffer closed")]
pub struct BufferClosed;

/// Accumulated chunks for one block index.
#[derive(Debug)]
pub struct BufferEntry {
    /// The block index this entry belongs to.
    pub index: u64,
    /// Whether all chunks for the block have arrived.
    pub done: bool,
    /// Chunks in arrival order.
    pub chunks: Vec<Bytes>,
    bytes: u64,
    permit: Option<OwnedSemaphorePermit>,
}

impl BufferEntry {
    fn new(index: u64) -> Self {
        Self {
            index,
            done: false,
            chunks: Vec::new(),
            bytes: 0,
            permit: None,
        }
    }

    /// Total byte length of all accumulated chunks.
    pub fn byte_len(&self) -> u64 {
        self.bytes
    }
}

/// Mapping from block index to accumulated chunks, with a completion
/// flag per entry.
///
/// All operations take `&self`; the map is guarded by a mutex so that
/// concurrent fetch tasks and the flush cursor see consistent state.
/// [`take_if_done`](Self::take_if_done) is the single removal point for
/// delivery, which guarantees at-most-once delivery per index.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    entries: Mutex<BTreeMap<u64, BufferEntry>>,
    closed: AtomicBool,
}

impl ReassemblyBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk to the entry for `index`, creating the entry on
    /// the first chunk.
    ///
    /// Fails once the buffer has been closed by a terminal abort; a
    /// task that raced the abort signal must not grow the buffer.
    pub fn put(&self, index: u64, chunk: Bytes) -> Result<(), BufferClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BufferClosed);
        }
        let mut entries = self.entries.lock();
        let entry = entries.entry(index).or_insert_with(|| BufferEntry::new(index));
        entry.bytes += chunk.len() as u64;
        entry.chunks.push(chunk);
        Ok(())
    }

    /// Marks the entry for `index` complete and attaches the fetch
    /// task's buffer-slot permit, which is released when the entry is
    /// removed.
    ///
    /// Creates the entry if no chunk ever arrived (zero-length block),
    /// so the flush cursor can still advance past it.
    pub fn mark_done(&self, index: u64, permit: OwnedSemaphorePermit) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(index).or_insert_with(|| BufferEntry::new(index));
        entry.done = true;
        entry.permit = Some(permit);
    }

    /// Whether the entry for `index` exists and is complete.
    pub fn is_done(&self, index: u64) -> bool {
        self.entries.lock().get(&index).map(|e| e.done).unwrap_or(false)
    }

    /// Atomically removes and returns the entry for `index` if it is
    /// complete; returns `None` for absent or partially received
    /// entries so a half-fetched block can never be flushed.
    pub fn take_if_done(&self, index: u64) -> Option<BufferEntry> {
        let mut entries = self.entries.lock();
        if entries.get(&index).map(|e| e.done).unwrap_or(false) {
            entries.remove(&index)
        } else {
            None
        }
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry that is not complete and returns the total
    /// byte length removed, so the caller can report the reversal as a
    /// negative progress delta.
    ///
    /// Complete entries stay buffered; they are flushed, not
    /// re-fetched, after a resume.
    pub fn revert_incomplete(&self) -> u64 {
        let mut entries = self.entries.lock();
        let mut reverted = 0;
        entries.retain(|_, entry| {
            if entry.done {
                true
            } else {
                reverted += entry.bytes;
                false
            }
        });
        reverted
    }

    /// Closes the buffer; all subsequent `put`s fail. Called once the
    /// session reaches a terminal aborted state.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    fn permit() -> OwnedSemaphorePermit {
        Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap()
    }

    #[test]
    fn test_put_creates_entry_on_first_chunk() {
        let buffer = ReassemblyBuffer::new();
        assert!(buffer.is_empty());

        buffer.put(1, Bytes::from_static(b"abc")).unwrap();

        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_done(1));
    }

    #[test]
    fn test_take_if_done_refuses_partial_entry() {
        let buffer = ReassemblyBuffer::new();
        buffer.put(1, Bytes::from_static(b"abc")).unwrap();

        assert!(buffer.take_if_done(1).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_take_if_done_removes_complete_entry() {
        let buffer = ReassemblyBuffer::new();
        buffer.put(1, Bytes::from_static(b"ab")).unwrap();
        buffer.put(1, Bytes::from_static(b"cd")).unwrap();
        buffer.mark_done(1, permit());

        let entry = buffer.take_if_done(1).unwrap();
        assert_eq!(entry.chunks.len(), 2);
        assert_eq!(entry.byte_len(), 4);

        // Second take must yield nothing: at-most-once delivery.
        assert!(buffer.take_if_done(1).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mark_done_creates_entry_for_empty_block() {
        let buffer = ReassemblyBuffer::new();
        buffer.mark_done(2, permit());

        let entry = buffer.take_if_done(2).unwrap();
        assert!(entry.chunks.is_empty());
        assert_eq!(entry.byte_len(), 0);
    }

    #[test]
    fn test_revert_incomplete_keeps_done_entries() {
        let buffer = ReassemblyBuffer::new();
        buffer.put(1, Bytes::from_static(b"done")).unwrap();
        buffer.mark_done(1, permit());
        buffer.put(2, Bytes::from_static(b"half received")).unwrap();
        buffer.put(3, Bytes::from_static(b"x")).unwrap();

        let reverted = buffer.revert_incomplete();

        assert_eq!(reverted, 14);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.is_done(1));
    }

    #[test]
    fn test_put_fails_after_close() {
        let buffer = ReassemblyBuffer::new();
        buffer.close();
        assert!(buffer.put(1, Bytes::from_static(b"late")).is_err());
    }

    #[test]
    fn test_permit_released_when_entry_dropped() {
        let semaphore = Arc::new(Semaphore::new(1));
        let buffer = ReassemblyBuffer::new();

        let held = semaphore.clone().try_acquire_owned().unwrap();
        buffer.mark_done(1, held);
        assert!(semaphore.clone().try_acquire_owned().is_err());

        let entry = buffer.take_if_done(1).unwrap();
        drop(entry);
        assert!(semaphore.try_acquire_owned().is_ok());
    }

    mod property_tests {
        use super::*;
        use std::collections::{HashMap, HashSet};
        use proptest::prelude::*;

        proptest! {
            // Reverting must remove exactly the incomplete entries and
            // account for every incomplete byte, regardless of the
            // order chunks and completions arrive in.
            #[test]
            fn test_revert_accounts_all_incomplete_bytes(
                ops in proptest::collection::vec(
                    (1u64..16, 0usize..64, any::<bool>()),
                    0..40,
                )
            ) {
                let buffer = ReassemblyBuffer::new();
                let mut bytes_by_index: HashMap<u64, u64> = HashMap::new();
                let mut done: HashSet<u64> = HashSet::new();

                for (index, size, complete) in ops {
                    if size > 0 {
                        buffer.put(index, Bytes::from(vec![0u8; size])).unwrap();
                        *bytes_by_index.entry(index).or_default() += size as u64;
                    }
                    if complete {
                        buffer.mark_done(index, permit());
                        done.insert(index);
                    }
                }

                let touched: HashSet<u64> = bytes_by_index
                    .keys()
                    .copied()
                    .chain(done.iter().copied())
                    .collect();
                let expected_reverted: u64 = touched
                    .iter()
                    .filter(|index| !done.contains(index))
                    .map(|index| bytes_by_index.get(index).copied().unwrap_or(0))
                    .sum();

                let reverted = buffer.revert_incomplete();

                prop_assert_eq!(reverted, expected_reverted);
                prop_assert_eq!(buffer.len(), done.len());
                for index in &done {
                    prop_assert!(buffer.is_done(*index));
                }
            }
        }
    }
}
