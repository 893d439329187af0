//! Entry encoding and per-partition LRU maintenance.
//!
//! An entry is one chain of blocks: the 40-byte header in the first block,
//! then key bytes, then value bytes, flowing across the chain. All functions
//! here operate on raw entry addresses; the partition-lock and entry-lock
//! requirements of each operation are part of its safety contract.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bytes::{BytesSink, BytesSource};
use crate::raw::free_blocks::FreeBlocks;
use crate::raw::layout::{self, BLOCK_LINK_SIZE, ENTRY_HEADER_SIZE};
use crate::raw::partition::PartitionTable;

/// Cursor over an entry's data area (everything after the header).
///
/// Positions map onto the chain as: first block `[ENTRY_HEADER_SIZE,
/// block_size)`, every later block `[BLOCK_LINK_SIZE, block_size)`.
struct ChainCursor {
    block: u64,
    offset: usize,
    block_size: usize,
}

impl ChainCursor {
    /// # Safety
    /// `head` must be the first block of a live chain.
    unsafe fn at_data_start(head: u64, block_size: usize) -> Self {
        ChainCursor {
            block: head,
            offset: ENTRY_HEADER_SIZE,
            block_size,
        }
    }

    /// Contiguous bytes left in the current block.
    fn contiguous(&self) -> usize {
        self.block_size - self.offset
    }

    /// # Safety
    /// The cursor must be within the chain's data bounds.
    unsafe fn ptr(&self) -> *mut u8 {
        (self.block + self.offset as u64) as *mut u8
    }

    /// Move forward by `n` bytes, `n <= contiguous()`, following the chain
    /// link when the block is exhausted.
    ///
    /// # Safety
    /// The cursor must stay within the chain's data bounds.
    unsafe fn advance(&mut self, n: usize) {
        self.offset += n;
        if self.offset == self.block_size {
            self.block = layout::block_link(self.block).load(Ordering::Relaxed);
            self.offset = BLOCK_LINK_SIZE;
        }
    }

    /// Move forward by an arbitrary number of bytes.
    ///
    /// # Safety
    /// Same bounds requirement as `advance`.
    unsafe fn skip(&mut self, mut n: usize) {
        while n > 0 {
            let step = n.min(self.contiguous());
            self.advance(step);
            n -= step;
        }
    }
}

/// Streaming reader over a sub-range of an entry's data area.
///
/// Created by [`EntryAccess::key_reader`] / [`EntryAccess::value_reader`];
/// the entry must stay locked (or otherwise owned) while the reader lives.
pub struct ChainReader {
    cursor: ChainCursor,
    remaining: usize,
}

impl Read for ChainReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = buf.len().min(self.remaining).min(self.cursor.contiguous());
        unsafe {
            std::ptr::copy_nonoverlapping(self.cursor.ptr() as *const u8, buf.as_mut_ptr(), take);
            self.cursor.advance(take);
        }
        self.remaining -= take;
        Ok(take)
    }
}

/// Streaming writer over the pre-allocated value region of an entry.
///
/// Created by [`EntryAccess::value_writer`]; the entry must be exclusively
/// owned by the caller (not yet published to any partition).
pub struct ChainWriter {
    cursor: ChainCursor,
    remaining: usize,
}

impl Write for ChainWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "serializer output exceeds declared value length",
            ));
        }
        let take = buf.len().min(self.remaining).min(self.cursor.contiguous());
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.cursor.ptr(), take);
            self.cursor.advance(take);
        }
        self.remaining -= take;
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Entry codec and LRU list operations for one cache instance.
pub struct EntryAccess {
    block_size: usize,
    lru_warn_trigger: usize,
    lru_warned: AtomicBool,
}

impl EntryAccess {
    pub fn new(block_size: usize, lru_warn_trigger: usize) -> Self {
        EntryAccess {
            block_size,
            lru_warn_trigger,
            lru_warned: AtomicBool::new(false),
        }
    }

    // --- Entry creation -------------------------------------------------

    /// Allocate and fill a new entry chain. No locks are required; the
    /// returned entry is owned by the caller until it is linked into a
    /// partition. Returns 0 when the pool cannot provide the chain.
    ///
    /// When `value` is `None`, `value_len` bytes are reserved and left for a
    /// later [`Self::value_writer`] pass.
    ///
    /// # Safety
    /// `free_blocks` must allocate from the same region this `EntryAccess`
    /// addresses, with the same block size.
    pub unsafe fn create_entry_chain<K, V>(
        &self,
        free_blocks: &FreeBlocks,
        hash: u32,
        key: &K,
        value: Option<&V>,
        value_len: usize,
    ) -> u64
    where
        K: BytesSource + ?Sized,
        V: BytesSource + ?Sized,
    {
        let key_len = key.size();
        let value_len = value.map(|v| v.size()).unwrap_or(value_len);
        let total = ENTRY_HEADER_SIZE + key_len + value_len;

        let head = free_blocks.allocate_chain(total);
        if head == 0 {
            return 0;
        }

        let e = layout::entry(head);
        e.lru_next.store(0, Ordering::Relaxed);
        e.lru_prev.store(0, Ordering::Relaxed);
        e.hash.store(hash, Ordering::Relaxed);
        // Recycled blocks may carry a stale lock word from a freed entry.
        e.lock.store(0, Ordering::Relaxed);
        e.key_len.store(key_len as u32, Ordering::Relaxed);
        e.value_len.store(value_len as u32, Ordering::Relaxed);

        let mut cursor = ChainCursor::at_data_start(head, self.block_size);
        Self::stream_in(&mut cursor, key);
        if let Some(value) = value {
            Self::stream_in(&mut cursor, value);
        }
        head
    }

    /// Copy a full source through the cursor.
    unsafe fn stream_in<S: BytesSource + ?Sized>(cursor: &mut ChainCursor, source: &S) {
        let len = source.size();
        let mut pos = 0;
        while pos < len {
            let take = cursor.contiguous().min(len - pos);
            let chunk = source.bytes(pos, take);
            std::ptr::copy_nonoverlapping(chunk.as_ptr(), cursor.ptr(), take);
            cursor.advance(take);
            pos += take;
        }
    }

    // --- Lookup ---------------------------------------------------------

    /// Walk a locked partition's LRU list and return the first entry whose
    /// hash, key length, and key bytes match, or 0.
    ///
    /// Emits a one-shot warning when the walk exceeds the configured list
    /// length threshold.
    ///
    /// # Safety
    /// The caller must hold the partition lock for `partition_addr`.
    pub unsafe fn find<K>(
        &self,
        partitions: &PartitionTable,
        partition_addr: u64,
        hash: u32,
        key: &K,
    ) -> u64
    where
        K: BytesSource + ?Sized,
    {
        let key_len = key.size();
        let mut scanned = 0usize;
        let mut addr = partitions.lru_head(partition_addr);
        while addr != 0 {
            scanned += 1;
            if scanned > self.lru_warn_trigger && !self.lru_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    threshold = self.lru_warn_trigger,
                    "partition LRU list length exceeds threshold, consider a larger hash table"
                );
            }
            let e = layout::entry(addr);
            if e.hash() == hash && e.key_len() as usize == key_len && self.key_matches(addr, key) {
                return addr;
            }
            addr = e.lru_next();
        }
        0
    }

    /// Byte-for-byte comparison of an entry's stored key against a source.
    ///
    /// # Safety
    /// `entry_addr` must be a live entry protected by the partition lock.
    unsafe fn key_matches<K>(&self, entry_addr: u64, key: &K) -> bool
    where
        K: BytesSource + ?Sized,
    {
        let key_len = layout::entry(entry_addr).key_len() as usize;
        let mut cursor = ChainCursor::at_data_start(entry_addr, self.block_size);
        let mut pos = 0;
        while pos < key_len {
            let take = cursor.contiguous().min(key_len - pos);
            let stored = std::slice::from_raw_parts(cursor.ptr() as *const u8, take);
            if stored != key.bytes(pos, take) {
                return false;
            }
            cursor.advance(take);
            pos += take;
        }
        true
    }

    // --- LRU list maintenance -------------------------------------------

    /// Link an entry at the head (MRU end) of a locked partition's list.
    ///
    /// # Safety
    /// The caller must hold the partition lock; `entry_addr` must not
    /// currently be on any list.
    pub unsafe fn add_as_head(
        &self,
        partitions: &PartitionTable,
        partition_addr: u64,
        entry_addr: u64,
    ) {
        let head = partitions.lru_head(partition_addr);
        let e = layout::entry(entry_addr);
        e.lru_prev.store(0, Ordering::Relaxed);
        e.lru_next.store(head, Ordering::Relaxed);
        if head != 0 {
            layout::entry(head).lru_prev.store(entry_addr, Ordering::Relaxed);
        }
        partitions.set_lru_head(partition_addr, entry_addr);
    }

    /// Splice an entry out of a locked partition's list. The entry's own
    /// links are left stale; it must not be traversed from afterwards.
    ///
    /// # Safety
    /// The caller must hold the partition lock; `entry_addr` must be on this
    /// partition's list.
    pub unsafe fn remove_from_lru(
        &self,
        partitions: &PartitionTable,
        partition_addr: u64,
        entry_addr: u64,
    ) {
        let e = layout::entry(entry_addr);
        let prev = e.lru_prev();
        let next = e.lru_next();
        if prev != 0 {
            layout::entry(prev).lru_next.store(next, Ordering::Relaxed);
        } else {
            partitions.set_lru_head(partition_addr, next);
        }
        if next != 0 {
            layout::entry(next).lru_prev.store(prev, Ordering::Relaxed);
        }
    }

    /// Promote an entry to the head of its partition's list.
    ///
    /// # Safety
    /// Same requirements as [`Self::remove_from_lru`].
    pub unsafe fn touch(
        &self,
        partitions: &PartitionTable,
        partition_addr: u64,
        entry_addr: u64,
    ) {
        self.remove_from_lru(partitions, partition_addr, entry_addr);
        self.add_as_head(partitions, partition_addr, entry_addr);
    }

    // --- Entry lock -----------------------------------------------------

    /// Spin until the entry's lock word is taken. A no-op for address 0.
    ///
    /// This is a hand-off lock: an operation about to free the chain
    /// acquires it and never releases it, so a reader holding the lock is
    /// guaranteed to finish before the blocks are recycled.
    ///
    /// # Safety
    /// `entry_addr` must be 0 or a live entry the caller either found under
    /// the partition lock or owns after unlinking.
    pub unsafe fn lock_entry(&self, entry_addr: u64) {
        if entry_addr == 0 {
            return;
        }
        let lock = &layout::entry(entry_addr).lock;
        while lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Release an entry lock taken for reading.
    ///
    /// # Safety
    /// The caller must hold the entry lock and the chain must not have been
    /// handed to the allocator.
    pub unsafe fn unlock_entry(&self, entry_addr: u64) {
        if entry_addr == 0 {
            return;
        }
        layout::entry(entry_addr).lock.store(0, Ordering::Release);
    }

    // --- Payload access -------------------------------------------------

    /// Stream the entry's value into a sink.
    ///
    /// # Safety
    /// The caller must hold the entry lock or otherwise own the entry.
    pub unsafe fn write_value_to_sink(
        &self,
        entry_addr: u64,
        sink: &mut dyn BytesSink,
    ) -> io::Result<()> {
        let e = layout::entry(entry_addr);
        let key_len = e.key_len() as usize;
        let value_len = e.value_len() as usize;
        let mut cursor = ChainCursor::at_data_start(entry_addr, self.block_size);
        cursor.skip(key_len);
        let mut pos = 0;
        while pos < value_len {
            let take = cursor.contiguous().min(value_len - pos);
            let chunk = std::slice::from_raw_parts(cursor.ptr() as *const u8, take);
            sink.put_bytes(pos, chunk)?;
            cursor.advance(take);
            pos += take;
        }
        Ok(())
    }

    /// Reader over the entry's key bytes.
    ///
    /// # Safety
    /// The caller must hold the entry lock (or the partition lock) for as
    /// long as the reader is used.
    pub unsafe fn key_reader(&self, entry_addr: u64) -> ChainReader {
        let key_len = layout::entry(entry_addr).key_len() as usize;
        ChainReader {
            cursor: ChainCursor::at_data_start(entry_addr, self.block_size),
            remaining: key_len,
        }
    }

    /// Reader over the entry's value bytes.
    ///
    /// # Safety
    /// The caller must hold the entry lock for as long as the reader is used.
    pub unsafe fn value_reader(&self, entry_addr: u64) -> ChainReader {
        let e = layout::entry(entry_addr);
        let key_len = e.key_len() as usize;
        let value_len = e.value_len() as usize;
        let mut cursor = ChainCursor::at_data_start(entry_addr, self.block_size);
        cursor.skip(key_len);
        ChainReader {
            cursor,
            remaining: value_len,
        }
    }

    /// Writer over the entry's reserved value region, for serializers that
    /// fill the value after allocation.
    ///
    /// # Safety
    /// The entry must be exclusively owned and not yet published.
    pub unsafe fn value_writer(&self, entry_addr: u64) -> ChainWriter {
        let e = layout::entry(entry_addr);
        let key_len = e.key_len() as usize;
        let value_len = e.value_len() as usize;
        let mut cursor = ChainCursor::at_data_start(entry_addr, self.block_size);
        cursor.skip(key_len);
        ChainWriter {
            cursor,
            remaining: value_len,
        }
    }

    /// Copy of the entry's key bytes.
    ///
    /// # Safety
    /// The caller must hold the partition lock or the entry lock.
    pub unsafe fn copy_key(&self, entry_addr: u64) -> Vec<u8> {
        let key_len = layout::entry(entry_addr).key_len() as usize;
        let mut out = Vec::with_capacity(key_len);
        // ChainReader never fails; it only copies mapped bytes.
        let _ = self.key_reader(entry_addr).read_to_end(&mut out);
        out
    }

    // --- Hot entries ----------------------------------------------------

    /// Visit up to `n` entries from the MRU end of one partition, holding
    /// the partition lock for the duration. The callback must not run user
    /// code; it is limited to copying bytes out.
    ///
    /// # Safety
    /// `partition_index` must be below the table's partition count.
    pub unsafe fn hot_entries<F: FnMut(u64)>(
        &self,
        partitions: &PartitionTable,
        partition_index: u32,
        n: usize,
        mut f: F,
    ) {
        let partition_addr = partitions.lock_partition_for_hash(partition_index);
        let mut addr = partitions.lru_head(partition_addr);
        let mut visited = 0;
        while addr != 0 && visited < n {
            f(addr);
            visited += 1;
            addr = layout::entry(addr).lru_next();
        }
        partitions.unlock_partition(partition_addr);
    }
}
