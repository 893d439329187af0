//! Block-granular allocator over the pool.
//!
//! Free blocks form a lock-free LIFO stack threaded through the first eight
//! bytes of each block, the same field an allocated block uses as its chain
//! link. Pop and push are CAS loops on the stack top; a pushed block's link
//! is rewritten before the CAS that publishes it, and every freed block
//! returns to this single stack.

use std::sync::atomic::{AtomicU64, Ordering};

use super::layout;

/// Lock-free free-block stack over the pool range `[pool_base, pool_end)`.
pub struct FreeBlocks {
    block_size: usize,
    total_blocks: u64,
    top: AtomicU64,
    spins: AtomicU64,
}

impl FreeBlocks {
    /// Build the allocator and link every block of the pool onto the stack.
    ///
    /// # Safety
    /// `[pool_base, pool_end)` must be a live, exclusively owned slice of the
    /// backing region, and `pool_end - pool_base` a multiple of `block_size`.
    pub unsafe fn new(pool_base: u64, pool_end: u64, block_size: usize) -> Self {
        let total_blocks = (pool_end - pool_base) / block_size as u64;
        let mut addr = pool_base;
        while addr < pool_end {
            let next = addr + block_size as u64;
            let link = if next < pool_end { next } else { 0 };
            layout::block_link(addr).store(link, Ordering::Relaxed);
            addr = next;
        }
        FreeBlocks {
            block_size,
            total_blocks,
            top: AtomicU64::new(if total_blocks > 0 { pool_base } else { 0 }),
            spins: AtomicU64::new(0),
        }
    }

    /// Number of blocks the pool was built with.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Pop one block, or 0 when the pool is exhausted.
    fn pop(&self) -> u64 {
        loop {
            let head = self.top.load(Ordering::Acquire);
            if head == 0 {
                return 0;
            }
            let next = unsafe { layout::block_link(head) }.load(Ordering::Relaxed);
            if self
                .top
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return head;
            }
            self.spins.fetch_add(1, Ordering::Relaxed);
            std::hint::spin_loop();
        }
    }

    /// Push one block back onto the stack.
    fn push(&self, addr: u64) {
        let link = unsafe { layout::block_link(addr) };
        loop {
            let head = self.top.load(Ordering::Relaxed);
            link.store(head, Ordering::Relaxed);
            if self
                .top
                .compare_exchange_weak(head, addr, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Allocate a chain large enough for `total_bytes` of entry data.
    ///
    /// Returns the head block address, or 0 when the pool cannot provide the
    /// chain; a partial allocation is pushed back before returning 0. The
    /// blocks are linked through their chain-link words, last block zero.
    pub fn allocate_chain(&self, total_bytes: usize) -> u64 {
        let blocks = layout::chain_block_count(self.block_size, total_bytes);
        let mut head = 0u64;
        for _ in 0..blocks {
            let block = self.pop();
            if block == 0 {
                if head != 0 {
                    self.free_chain(head);
                }
                return 0;
            }
            unsafe { layout::block_link(block) }.store(head, Ordering::Relaxed);
            head = block;
        }
        head
    }

    /// Return every block of a chain to the stack. Returns the block count.
    pub fn free_chain(&self, head: u64) -> u64 {
        let mut freed = 0u64;
        let mut addr = head;
        while addr != 0 {
            let next = unsafe { layout::block_link(addr) }.load(Ordering::Relaxed);
            self.push(addr);
            freed += 1;
            addr = next;
        }
        freed
    }

    /// Count free blocks by walking the stack. O(free blocks); diagnostic.
    ///
    /// Under concurrent pops and pushes the walk can observe a mix of stack
    /// generations, so the count is approximate while the cache is active.
    pub fn calc_free_count(&self) -> u64 {
        let mut count = 0u64;
        let mut addr = self.top.load(Ordering::Acquire);
        while addr != 0 && count < self.total_blocks {
            count += 1;
            addr = unsafe { layout::block_link(addr) }.load(Ordering::Relaxed);
        }
        count
    }

    /// Cumulative CAS retries on pop.
    pub fn free_block_spins(&self) -> u64 {
        self.spins.load(Ordering::Relaxed)
    }
}
