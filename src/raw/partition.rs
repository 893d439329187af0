//! Partition table addressing and per-partition spinlocks.
//!
//! The table is an array of 16-byte slots at the front of the region. Each
//! slot guards one hash partition: a CAS spinlock word and the address of
//! the head of that partition's LRU chain. The partition index for a hash is
//! `hash & (partition_count - 1)`.

use std::sync::atomic::{AtomicU64, Ordering};

use super::layout::{self, PARTITION_SLOT_SIZE};

/// Accessor over the partition table region.
pub struct PartitionTable {
    base: u64,
    count: u32,
    mask: u32,
    spins: AtomicU64,
}

impl PartitionTable {
    /// Table byte size for `count` partitions.
    pub fn size_for_partitions(count: u32) -> usize {
        count as usize * PARTITION_SLOT_SIZE
    }

    /// Wrap the table at `base`.
    ///
    /// # Safety
    /// `base` must point at `size_for_partitions(count)` zeroed bytes of the
    /// backing region, and `count` must be a power of two.
    pub unsafe fn new(base: u64, count: u32) -> Self {
        debug_assert!(count.is_power_of_two());
        PartitionTable {
            base,
            count,
            mask: count - 1,
            spins: AtomicU64::new(0),
        }
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.count
    }

    /// Spin until the partition for `hash` is locked; returns its slot
    /// address. Non-reentrant.
    pub fn lock_partition_for_hash(&self, hash: u32) -> u64 {
        let addr = self.base + (hash & self.mask) as u64 * PARTITION_SLOT_SIZE as u64;
        let slot = unsafe { layout::partition(addr) };
        while slot
            .lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.spins.fetch_add(1, Ordering::Relaxed);
            std::hint::spin_loop();
        }
        addr
    }

    /// Release a partition lock taken by `lock_partition_for_hash`.
    pub fn unlock_partition(&self, partition_addr: u64) {
        unsafe { layout::partition(partition_addr) }
            .lock
            .store(0, Ordering::Release);
    }

    /// LRU head of a locked partition.
    ///
    /// # Safety
    /// The caller must hold the partition lock for `partition_addr`.
    pub unsafe fn lru_head(&self, partition_addr: u64) -> u64 {
        layout::partition(partition_addr).lru_head.load(Ordering::Relaxed)
    }

    /// Set the LRU head of a locked partition.
    ///
    /// # Safety
    /// The caller must hold the partition lock for `partition_addr`.
    pub unsafe fn set_lru_head(&self, partition_addr: u64, entry_addr: u64) {
        layout::partition(partition_addr)
            .lru_head
            .store(entry_addr, Ordering::Relaxed);
    }

    /// Cumulative CAS retries across all partition locks.
    pub fn lock_spins(&self) -> u64 {
        self.spins.load(Ordering::Relaxed)
    }
}
