//! `#[repr(C)]` structures that live in the off-heap region.
//!
//! All structs use fixed-size fields and explicit padding so field offsets
//! are stable; sizes are asserted at compile time. Every field that may be
//! observed by more than one thread is an atomic, accessed through shared
//! references obtained from raw addresses.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 512;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 262_144;
/// Smallest accepted partition count.
pub const MIN_HASH_TABLE_SIZE: u32 = 32;
/// Largest accepted partition count.
pub const MAX_HASH_TABLE_SIZE: u32 = 4_194_304;
/// Smallest accepted capacity.
pub const MIN_CAPACITY: u64 = 8 * 1024 * 1024;

/// Bytes at the start of every block holding the next-block address.
pub const BLOCK_LINK_SIZE: usize = 8;

/// Size of the entry header occupying the start of an entry's first block.
pub const ENTRY_HEADER_SIZE: usize = 40;

/// Entry header at offset 0 of an entry's first block.
///
/// Subsequent blocks of the chain carry only the 8-byte link; key bytes
/// followed by value bytes start at `ENTRY_HEADER_SIZE` in the first block
/// and continue at `BLOCK_LINK_SIZE` in every later block.
#[repr(C)]
pub struct EntryHeader {
    pub next_block: AtomicU64, // 0..8   chain link (0 = last block)
    pub lru_next: AtomicU64,   // 8..16  toward LRU tail (0 = tail)
    pub lru_prev: AtomicU64,   // 16..24 toward LRU head (0 = head)
    pub hash: AtomicU32,       // 24..28 caller-supplied key hash
    pub lock: AtomicU32,       // 28..32 0 = unlocked, 1 = locked
    pub key_len: AtomicU32,    // 32..36
    pub value_len: AtomicU32,  // 36..40
}

const _: () = assert!(std::mem::size_of::<EntryHeader>() == ENTRY_HEADER_SIZE);

impl EntryHeader {
    #[inline]
    pub fn lru_next(&self) -> u64 {
        self.lru_next.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lru_prev(&self) -> u64 {
        self.lru_prev.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn key_len(&self) -> u32 {
        self.key_len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn value_len(&self) -> u32 {
        self.value_len.load(Ordering::Relaxed)
    }
}

/// Size of one slot in the partition table.
pub const PARTITION_SLOT_SIZE: usize = 16;

/// One partition slot: spinlock word plus the address of the LRU head.
///
/// `lru_head` must only be read or written while `lock` is held.
#[repr(C)]
pub struct PartitionSlot {
    pub lock: AtomicU32,     // 0..4   0 = unlocked, 1 = locked
    pub _pad: u32,           // 4..8
    pub lru_head: AtomicU64, // 8..16  MRU entry address (0 = empty)
}

const _: () = assert!(std::mem::size_of::<PartitionSlot>() == PARTITION_SLOT_SIZE);

/// Payload bytes per block, after the chain link.
#[inline]
pub fn block_payload(block_size: usize) -> usize {
    block_size - BLOCK_LINK_SIZE
}

/// Number of blocks a chain needs for `total_bytes` of entry data
/// (header plus key plus value).
#[inline]
pub fn chain_block_count(block_size: usize, total_bytes: usize) -> usize {
    total_bytes.div_ceil(block_payload(block_size)).max(1)
}

/// Entry header reference at a raw address.
///
/// # Safety
/// `addr` must point at the first block of a live entry chain (or a block
/// being initialized by the caller) inside the backing region.
#[inline]
pub unsafe fn entry<'a>(addr: u64) -> &'a EntryHeader {
    &*(addr as *const EntryHeader)
}

/// Chain-link reference of any block, entry or free.
///
/// # Safety
/// `addr` must point at a block inside the backing region.
#[inline]
pub unsafe fn block_link<'a>(addr: u64) -> &'a AtomicU64 {
    &*(addr as *const AtomicU64)
}

/// Partition slot reference at a raw address.
///
/// # Safety
/// `addr` must point at a slot of a live partition table.
#[inline]
pub unsafe fn partition<'a>(addr: u64) -> &'a PartitionSlot {
    &*(addr as *const PartitionSlot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn entry_header_field_offsets() {
        assert_eq!(offset_of!(EntryHeader, next_block), 0);
        assert_eq!(offset_of!(EntryHeader, lru_next), 8);
        assert_eq!(offset_of!(EntryHeader, lru_prev), 16);
        assert_eq!(offset_of!(EntryHeader, hash), 24);
        assert_eq!(offset_of!(EntryHeader, lock), 28);
        assert_eq!(offset_of!(EntryHeader, key_len), 32);
        assert_eq!(offset_of!(EntryHeader, value_len), 36);
    }

    #[test]
    fn partition_slot_field_offsets() {
        assert_eq!(offset_of!(PartitionSlot, lock), 0);
        assert_eq!(offset_of!(PartitionSlot, lru_head), 8);
    }

    #[test]
    fn chain_block_count_rounds_up() {
        // 512-byte blocks hold 504 payload bytes each.
        assert_eq!(chain_block_count(512, 1), 1);
        assert_eq!(chain_block_count(512, 504), 1);
        assert_eq!(chain_block_count(512, 505), 2);
        assert_eq!(chain_block_count(512, 1008), 2);
        assert_eq!(chain_block_count(512, 1009), 3);
    }

    #[test]
    fn chain_block_count_zero_bytes_needs_a_block() {
        assert_eq!(chain_block_count(512, 0), 1);
    }
}
