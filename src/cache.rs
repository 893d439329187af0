//! The untyped cache: public operations over the raw engine.
//!
//! Operations follow a strict locking discipline: entry chains are allocated
//! and filled before the partition lock is taken, user-visible byte
//! transfers happen after it is released, and a chain is only handed back to
//! the allocator once its entry lock is held. Entry locks taken on the
//! destruction path are never released.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::bytes::{BytesSink, BytesSource};
use crate::error::CacheError;
use crate::raw::entry::EntryAccess;
use crate::raw::free_blocks::FreeBlocks;
use crate::raw::layout;
use crate::raw::partition::PartitionTable;
use crate::raw::region::Region;
use crate::stats::{CacheStats, Counters, ExtendedCacheStats};

/// Result of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was not present; the entry was added.
    Added,
    /// An entry with the same key was replaced.
    Replaced,
    /// The pool could not provide a chain for the new entry.
    NoSpace,
}

/// Engine state shared between the public handle and the cleanup timer.
pub(crate) struct Core {
    free_blocks: FreeBlocks,
    partitions: PartitionTable,
    entries: EntryAccess,
    // Owns the mapping every raw address above points into.
    #[allow(dead_code)]
    region: Region,
    block_size: usize,
    capacity: u64,
    cleanup_trigger: f64,
    closed: AtomicBool,
    cleanup_running: AtomicBool,
    stats_enabled: AtomicBool,
    counters: Counters,
}

impl Core {
    pub(crate) fn new(
        block_size: usize,
        capacity: u64,
        hash_table_size: u32,
        cleanup_trigger: f64,
        lru_list_warn_trigger: usize,
        statistics_enabled: bool,
    ) -> Result<Core, CacheError> {
        let table_bytes = PartitionTable::size_for_partitions(hash_table_size);
        let region = Region::new(table_bytes, capacity as usize)?;
        let free_blocks =
            unsafe { FreeBlocks::new(region.pool_base(), region.pool_end(), block_size) };
        let partitions = unsafe { PartitionTable::new(region.table_base(), hash_table_size) };
        Ok(Core {
            free_blocks,
            partitions,
            entries: EntryAccess::new(block_size, lru_list_warn_trigger),
            region,
            block_size,
            capacity,
            cleanup_trigger,
            closed: AtomicBool::new(false),
            cleanup_running: AtomicBool::new(false),
            stats_enabled: AtomicBool::new(statistics_enabled),
            counters: Counters::default(),
        })
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn validate_key<K: BytesSource + ?Sized>(key: &K) -> Result<(), CacheError> {
        if key.size() == 0 {
            return Err(CacheError::InvalidArgument("key must not be empty"));
        }
        if key.size() > u32::MAX as usize {
            return Err(CacheError::InvalidArgument("key too large"));
        }
        Ok(())
    }

    // --- put ------------------------------------------------------------

    pub(crate) fn put<K, V>(
        &self,
        hash: u32,
        key: &K,
        value: &V,
        old_sink: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError>
    where
        K: BytesSource + ?Sized,
        V: BytesSource + ?Sized,
    {
        self.ensure_open()?;
        Self::validate_key(key)?;
        if value.size() > u32::MAX as usize {
            return Err(CacheError::InvalidArgument("value too large"));
        }

        // Allocate and fill outside the partition lock.
        let new_entry = unsafe {
            self.entries
                .create_entry_chain(&self.free_blocks, hash, key, Some(value), 0)
        };
        if new_entry == 0 {
            return Ok(PutOutcome::NoSpace);
        }
        self.put_entry(hash, key, new_entry, old_sink)
    }

    /// Deferred-serialization put: the chain is allocated with `value_len`
    /// reserved bytes and `fill` streams the value in before the entry is
    /// published. The serializer runs outside every lock.
    pub(crate) fn put_with_writer<K>(
        &self,
        hash: u32,
        key: &K,
        value_len: usize,
        fill: impl FnOnce(&mut dyn Write) -> io::Result<()>,
        old_sink: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.ensure_open()?;
        Self::validate_key(key)?;
        if value_len > u32::MAX as usize {
            return Err(CacheError::InvalidArgument("value too large"));
        }

        let new_entry = unsafe {
            self.entries
                .create_entry_chain::<K, [u8]>(&self.free_blocks, hash, key, None, value_len)
        };
        if new_entry == 0 {
            return Ok(PutOutcome::NoSpace);
        }
        {
            let mut writer = unsafe { self.entries.value_writer(new_entry) };
            if let Err(e) = fill(&mut writer) {
                // The entry was never published; reclaim it directly.
                self.free_blocks.free_chain(new_entry);
                return Err(CacheError::Io(e));
            }
        }
        self.put_entry(hash, key, new_entry, old_sink)
    }

    fn put_entry<K>(
        &self,
        hash: u32,
        key: &K,
        new_entry: u64,
        old_sink: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        let partition = self.partitions.lock_partition_for_hash(hash);
        let old_entry = unsafe {
            let old = self.entries.find(&self.partitions, partition, hash, key);
            if old != 0 {
                self.entries.remove_from_lru(&self.partitions, partition, old);
            }
            self.entries.add_as_head(&self.partitions, partition, new_entry);
            // The old entry must be locked before its blocks can be freed.
            // There is no matching unlock: the chain is being destroyed.
            self.entries.lock_entry(old);
            old
        };
        self.partitions.unlock_partition(partition);

        if old_entry == 0 {
            return Ok(PutOutcome::Added);
        }

        let sink_result = match old_sink {
            Some(sink) => unsafe { self.entries.write_value_to_sink(old_entry, sink) },
            None => Ok(()),
        };
        self.free_blocks.free_chain(old_entry);
        sink_result?;
        Ok(PutOutcome::Replaced)
    }

    // --- get ------------------------------------------------------------

    pub(crate) fn get<K>(
        &self,
        hash: u32,
        key: &K,
        sink: &mut dyn BytesSink,
    ) -> Result<bool, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.ensure_open()?;
        Self::validate_key(key)?;

        let entry = self.lookup_and_lock(hash, key);
        if entry == 0 {
            return Ok(false);
        }
        let result = unsafe { self.entries.write_value_to_sink(entry, sink) };
        unsafe { self.entries.unlock_entry(entry) };
        result?;
        Ok(true)
    }

    /// Typed read: run `read` over the value stream while the entry lock is
    /// held, then release it.
    pub(crate) fn get_with<K, R>(
        &self,
        hash: u32,
        key: &K,
        read: impl FnOnce(&mut dyn Read) -> io::Result<R>,
    ) -> Result<Option<R>, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.ensure_open()?;
        Self::validate_key(key)?;

        let entry = self.lookup_and_lock(hash, key);
        if entry == 0 {
            return Ok(None);
        }
        let result = {
            let mut reader = unsafe { self.entries.value_reader(entry) };
            read(&mut reader)
        };
        unsafe { self.entries.unlock_entry(entry) };
        Ok(Some(result?))
    }

    /// Find the entry, promote it, and take its lock, all under the
    /// partition lock; returns 0 on miss. Bumps hit/miss counters.
    fn lookup_and_lock<K>(&self, hash: u32, key: &K) -> u64
    where
        K: BytesSource + ?Sized,
    {
        let partition = self.partitions.lock_partition_for_hash(hash);
        let entry = unsafe {
            let entry = self.entries.find(&self.partitions, partition, hash, key);
            if entry != 0 {
                self.entries.touch(&self.partitions, partition, entry);
                // Keep the partition-lock hold short: take the entry lock
                // here, stream the value after the partition is released.
                self.entries.lock_entry(entry);
            }
            entry
        };
        self.partitions.unlock_partition(partition);

        if self.stats_enabled.load(Ordering::Relaxed) {
            let counter = if entry == 0 {
                &self.counters.miss
            } else {
                &self.counters.hit
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    // --- remove ---------------------------------------------------------

    pub(crate) fn remove<K>(&self, hash: u32, key: &K) -> Result<bool, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.ensure_open()?;
        Self::validate_key(key)?;

        let partition = self.partitions.lock_partition_for_hash(hash);
        let entry = unsafe { self.entries.find(&self.partitions, partition, hash, key) };
        if entry == 0 {
            self.partitions.unlock_partition(partition);
            return Ok(false);
        }
        unsafe {
            self.entries.remove_from_lru(&self.partitions, partition, entry);
            self.entries.lock_entry(entry);
        }
        self.partitions.unlock_partition(partition);

        // Destroyed entries stay locked; readers that held the lock are done.
        self.free_blocks.free_chain(entry);
        Ok(true)
    }

    // --- cleanup / eviction ---------------------------------------------

    /// Evict cold entries until the free-block fraction reaches the cleanup
    /// trigger. At most one cleanup runs at a time; re-entry returns
    /// immediately.
    pub(crate) fn cleanup(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.cleanup_locked();
        self.cleanup_running.store(false, Ordering::Release);
    }

    fn cleanup_locked(&self) {
        let total_blocks = self.free_blocks.total_blocks();
        let free_blocks = self.free_blocks.calc_free_count();
        let free_fraction = free_blocks as f64 / total_blocks as f64;
        if free_fraction > self.cleanup_trigger {
            return;
        }

        let entries = self.size();
        if entries == 0 {
            return;
        }
        let blocks_per_entry = (total_blocks - free_blocks) as f64 / entries as f64;
        let expected_free = self.cleanup_trigger * total_blocks as f64;
        let entries_to_remove = (expected_free - free_blocks as f64) * blocks_per_entry;
        let partition_count = self.partitions.partition_count();
        let per_partition = ((entries_to_remove / partition_count as f64) as u64).max(1);

        tracing::info!(
            free_fraction,
            entries,
            blocks_per_entry,
            entries_to_remove = entries_to_remove as u64,
            "cleanup starting"
        );

        let mut removed = 0u64;
        let mut blocks_freed = 0u64;

        for p in 0..partition_count {
            let partition = self.partitions.lock_partition_for_hash(p);
            let start = unsafe {
                let head = self.partitions.lru_head(partition);

                // Locate the tail; there is no stored tail pointer.
                let mut tail = 0u64;
                let mut addr = head;
                while addr != 0 {
                    tail = addr;
                    addr = layout::entry(addr).lru_next();
                }
                if tail == 0 {
                    self.partitions.unlock_partition(partition);
                    continue;
                }

                // Walk back up to `per_partition` steps from the tail's
                // predecessor; the pivot is the last entry kept.
                let mut pivot = 0u64;
                let mut addr = layout::entry(tail).lru_prev();
                for _ in 0..per_partition {
                    if addr == 0 {
                        break;
                    }
                    pivot = addr;
                    addr = layout::entry(addr).lru_prev();
                }

                if pivot == 0 {
                    // Single-entry list: detach it entirely.
                    self.partitions.set_lru_head(partition, 0);
                    head
                } else {
                    let start = layout::entry(pivot).lru_next();
                    layout::entry(pivot).lru_next.store(0, Ordering::Relaxed);
                    layout::entry(start).lru_prev.store(0, Ordering::Relaxed);
                    start
                }
            };
            self.partitions.unlock_partition(partition);

            // The suffix is unlinked; destroy it without the partition lock.
            let mut addr = start;
            while addr != 0 {
                let next = unsafe { layout::entry(addr).lru_next() };
                unsafe { self.entries.lock_entry(addr) };
                blocks_freed += self.free_blocks.free_chain(addr);
                removed += 1;
                addr = next;
            }
        }

        self.counters.eviction.fetch_add(removed, Ordering::Relaxed);
        tracing::info!(removed, blocks_freed, "cleanup finished");
    }

    // --- bulk -----------------------------------------------------------

    pub(crate) fn invalidate_all(&self) {
        for p in 0..self.partitions.partition_count() {
            let partition = self.partitions.lock_partition_for_hash(p);
            let head = unsafe {
                let head = self.partitions.lru_head(partition);
                self.partitions.set_lru_head(partition, 0);
                head
            };
            self.partitions.unlock_partition(partition);

            let mut addr = head;
            while addr != 0 {
                let next = unsafe { layout::entry(addr).lru_next() };
                unsafe { self.entries.lock_entry(addr) };
                self.free_blocks.free_chain(addr);
                addr = next;
            }
        }
    }

    pub(crate) fn hot_keys(&self, n: usize) -> Vec<Vec<u8>> {
        let partition_count = self.partitions.partition_count();
        let per_partition = n / partition_count as usize + 1;
        let mut keys = Vec::new();
        for p in 0..partition_count {
            unsafe {
                self.entries
                    .hot_entries(&self.partitions, p, per_partition, |addr| {
                        keys.push(self.entries.copy_key(addr));
                    });
            }
        }
        keys
    }

    // --- introspection --------------------------------------------------

    pub(crate) fn size(&self) -> u64 {
        self.lru_list_lengths().iter().sum()
    }

    fn lru_list_lengths(&self) -> Vec<u64> {
        let partition_count = self.partitions.partition_count();
        let mut lengths = Vec::with_capacity(partition_count as usize);
        for p in 0..partition_count {
            let partition = self.partitions.lock_partition_for_hash(p);
            let mut len = 0u64;
            unsafe {
                let mut addr = self.partitions.lru_head(partition);
                while addr != 0 {
                    len += 1;
                    addr = layout::entry(addr).lru_next();
                }
            }
            self.partitions.unlock_partition(partition);
            lengths.push(len);
        }
        lengths
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn hash_table_size(&self) -> u32 {
        self.partitions.partition_count()
    }

    pub(crate) fn mem_used(&self) -> u64 {
        self.capacity - self.free_blocks.calc_free_count() * self.block_size as u64
    }

    pub(crate) fn free_space_fraction(&self) -> f64 {
        self.free_blocks.calc_free_count() as f64 / self.free_blocks.total_blocks() as f64
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub(crate) fn extended_stats(&self) -> ExtendedCacheStats {
        let lru_list_lengths = self.lru_list_lengths();
        let size = lru_list_lengths.iter().sum();
        ExtendedCacheStats {
            stats: self.stats(),
            free_block_counts: vec![self.free_blocks.calc_free_count()],
            lru_list_lengths,
            size,
            block_size: self.block_size,
            capacity: self.capacity,
        }
    }

    pub(crate) fn set_statistics_enabled(&self, enabled: bool) {
        self.stats_enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn statistics_enabled(&self) -> bool {
        self.stats_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn record_load_success(&self, elapsed_ms: u64) {
        self.counters.load_success.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_load_time_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_load_exception(&self, elapsed_ms: u64) {
        self.counters.load_exception.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_load_time_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub(crate) fn free_block_spins(&self) -> u64 {
        self.free_blocks.free_block_spins()
    }

    pub(crate) fn partition_lock_spins(&self) -> u64 {
        self.partitions.lock_spins()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Background thread invoking `cleanup` on a fixed interval.
struct CleanupTimer {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupTimer {
    fn spawn(core: Arc<Core>, interval: Duration) -> io::Result<CleanupTimer> {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("blockcache-cleanup".into())
            .spawn(move || {
                let (lock, cvar) = &*thread_shutdown;
                let mut stop = lock.lock();
                loop {
                    if *stop {
                        break;
                    }
                    let _ = cvar.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                    drop(stop);
                    core.cleanup();
                    stop = lock.lock();
                }
            })?;
        Ok(CleanupTimer {
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn stop(&self) {
        {
            let (lock, cvar) = &*self.shutdown;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Off-heap, block-allocated key/value cache over opaque byte streams.
///
/// Built through [`CacheBuilder`](crate::builder::CacheBuilder). The caller
/// supplies the key hash with every operation; the typed facade
/// [`TypedCache`](crate::typed::TypedCache) derives it from serialized keys.
pub struct BlockCache {
    core: Arc<Core>,
    timer: Option<CleanupTimer>,
}

impl BlockCache {
    pub(crate) fn assemble(
        core: Core,
        cleanup_check_interval: Option<Duration>,
    ) -> Result<BlockCache, CacheError> {
        let core = Arc::new(core);
        let timer = match cleanup_check_interval {
            Some(interval) => Some(CleanupTimer::spawn(Arc::clone(&core), interval)?),
            None => None,
        };
        Ok(BlockCache { core, timer })
    }

    /// Store `value` under `key`. When `old_sink` is given and the key was
    /// present, the previous value is streamed into it before its chain is
    /// recycled.
    pub fn put<K, V>(
        &self,
        hash: u32,
        key: &K,
        value: &V,
        old_sink: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError>
    where
        K: BytesSource + ?Sized,
        V: BytesSource + ?Sized,
    {
        self.core.put(hash, key, value, old_sink)
    }

    /// Look up `key`; on a hit the value is streamed into `sink` and the
    /// entry is promoted to the MRU end of its partition.
    pub fn get<K>(&self, hash: u32, key: &K, sink: &mut dyn BytesSink) -> Result<bool, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.core.get(hash, key, sink)
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn remove<K>(&self, hash: u32, key: &K) -> Result<bool, CacheError>
    where
        K: BytesSource + ?Sized,
    {
        self.core.remove(hash, key)
    }

    /// Number of entries, summed per partition under its lock. O(entries).
    pub fn size(&self) -> u64 {
        self.core.size()
    }

    /// Configured pool capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.core.capacity()
    }

    /// Normalized block size in bytes.
    pub fn block_size(&self) -> usize {
        self.core.block_size()
    }

    /// Number of hash partitions.
    pub fn hash_table_size(&self) -> u32 {
        self.core.hash_table_size()
    }

    /// Bytes currently held by entry chains.
    pub fn mem_used(&self) -> u64 {
        self.core.mem_used()
    }

    /// Fraction of pool blocks on the free stack.
    pub fn free_space_fraction(&self) -> f64 {
        self.core.free_space_fraction()
    }

    /// Run eviction if the free fraction is at or below the cleanup trigger.
    pub fn cleanup(&self) {
        self.core.cleanup()
    }

    /// Remove every entry and return all blocks to the pool.
    pub fn invalidate_all(&self) {
        self.core.invalidate_all()
    }

    /// Serialized keys of up to roughly `n` most recently used entries,
    /// gathered per partition.
    pub fn hot_keys(&self, n: usize) -> Vec<Vec<u8>> {
        self.core.hot_keys(n)
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        self.core.stats()
    }

    /// Counters plus structural diagnostics; locks every partition.
    pub fn extended_stats(&self) -> ExtendedCacheStats {
        self.core.extended_stats()
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.core.set_statistics_enabled(enabled)
    }

    pub fn statistics_enabled(&self) -> bool {
        self.core.statistics_enabled()
    }

    /// Cumulative CAS retries popping free blocks.
    pub fn free_block_spins(&self) -> u64 {
        self.core.free_block_spins()
    }

    /// Cumulative CAS retries acquiring partition locks.
    pub fn partition_lock_spins(&self) -> u64 {
        self.core.partition_lock_spins()
    }

    /// Stop the cleanup timer and fail all subsequent operations. The
    /// backing region is released when the cache is dropped.
    pub fn close(&self) {
        self.core.close();
        if let Some(timer) = &self.timer {
            timer.stop();
        }
    }

    pub(crate) fn core(&self) -> &Core {
        &self.core
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CacheBuilder;
    use crate::bytes::VecSink;

    fn small_cache() -> BlockCache {
        CacheBuilder::new()
            .block_size(512)
            .capacity(8 * 1024 * 1024)
            .hash_table_size(32)
            .build()
            .unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let cache = small_cache();
        let outcome = cache.put(0x1, b"a".as_slice(), b"A".as_slice(), None).unwrap();
        assert_eq!(outcome, PutOutcome::Added);

        let mut sink = VecSink::new();
        assert!(cache.get(0x1, b"a".as_slice(), &mut sink).unwrap());
        assert_eq!(sink.as_slice(), b"A");
    }

    #[test]
    fn replace_streams_old_value() {
        let cache = small_cache();
        cache.put(0x1, b"a".as_slice(), b"A".as_slice(), None).unwrap();

        let mut old = VecSink::new();
        let outcome = cache
            .put(0x1, b"a".as_slice(), b"BB".as_slice(), Some(&mut old))
            .unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(old.as_slice(), b"A");

        let mut sink = VecSink::new();
        assert!(cache.get(0x1, b"a".as_slice(), &mut sink).unwrap());
        assert_eq!(sink.as_slice(), b"BB");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn get_miss_returns_false() {
        let cache = small_cache();
        let mut sink = VecSink::new();
        assert!(!cache.get(0x9, b"missing".as_slice(), &mut sink).unwrap());
        assert!(sink.as_slice().is_empty());
    }

    #[test]
    fn remove_then_get_misses_and_memory_returns() {
        let cache = small_cache();
        cache.put(5, b"x".as_slice(), b"X".as_slice(), None).unwrap();
        assert!(cache.remove(5, b"x".as_slice()).unwrap());
        assert!(!cache.remove(5, b"x".as_slice()).unwrap());

        let mut sink = VecSink::new();
        assert!(!cache.get(5, b"x".as_slice(), &mut sink).unwrap());
        assert_eq!(cache.mem_used(), 0);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn empty_key_is_rejected_before_any_work() {
        let cache = small_cache();
        let mut sink = VecSink::new();
        assert!(matches!(
            cache.put(1, b"".as_slice(), b"v".as_slice(), None),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.get(1, b"".as_slice(), &mut sink),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.remove(1, b"".as_slice()),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn closed_cache_fails_fast() {
        let cache = small_cache();
        cache.put(1, b"k".as_slice(), b"v".as_slice(), None).unwrap();
        cache.close();

        let mut sink = VecSink::new();
        assert!(matches!(
            cache.get(1, b"k".as_slice(), &mut sink),
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            cache.put(1, b"k".as_slice(), b"v".as_slice(), None),
            Err(CacheError::Closed)
        ));
        assert!(matches!(cache.remove(1, b"k".as_slice()), Err(CacheError::Closed)));
    }

    #[test]
    fn hit_and_miss_counters_respect_toggle() {
        let cache = small_cache();
        cache.put(1, b"k".as_slice(), b"v".as_slice(), None).unwrap();

        let mut sink = VecSink::new();
        cache.get(1, b"k".as_slice(), &mut sink).unwrap();
        cache.get(2, b"nope".as_slice(), &mut sink).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);

        cache.set_statistics_enabled(false);
        cache.get(1, b"k".as_slice(), &mut sink).unwrap();
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[test]
    fn same_hash_different_keys_coexist() {
        let cache = small_cache();
        cache.put(7, b"one".as_slice(), b"1".as_slice(), None).unwrap();
        cache.put(7, b"two".as_slice(), b"2".as_slice(), None).unwrap();
        assert_eq!(cache.size(), 2);

        let mut sink = VecSink::new();
        assert!(cache.get(7, b"one".as_slice(), &mut sink).unwrap());
        assert_eq!(sink.as_slice(), b"1");
        sink.clear();
        assert!(cache.get(7, b"two".as_slice(), &mut sink).unwrap());
        assert_eq!(sink.as_slice(), b"2");
    }

    #[test]
    fn invalidate_all_empties_every_partition() {
        let cache = small_cache();
        for i in 0u32..100 {
            let key = format!("key-{i}").into_bytes();
            cache.put(i, &key, b"value".as_slice(), None).unwrap();
        }
        assert_eq!(cache.size(), 100);

        cache.invalidate_all();
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.mem_used(), 0);
        assert!((cache.free_space_fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hot_keys_reports_mru_entries() {
        let cache = small_cache();
        cache.put(1, b"cold".as_slice(), b"c".as_slice(), None).unwrap();
        cache.put(1, b"warm".as_slice(), b"w".as_slice(), None).unwrap();

        let keys = cache.hot_keys(64);
        assert!(keys.contains(&b"warm".to_vec()));
        assert!(keys.contains(&b"cold".to_vec()));
    }

    #[test]
    fn multi_block_values_round_trip() {
        let cache = small_cache();
        let value: Vec<u8> = (0..10_000).map(|i| (i % 253) as u8).collect();
        cache.put(3, b"big".as_slice(), &value, None).unwrap();

        let mut sink = VecSink::new();
        assert!(cache.get(3, b"big".as_slice(), &mut sink).unwrap());
        assert_eq!(sink.as_slice(), value.as_slice());

        // mem_used accounts for every block of the chain.
        let blocks = layout::chain_block_count(cache.block_size(), 40 + 3 + value.len());
        assert_eq!(cache.mem_used(), blocks as u64 * cache.block_size() as u64);
    }
}
