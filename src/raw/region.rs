//! Backing memory region.
//!
//! One anonymous memory mapping holds the entire cache: the partition table
//! at the front, the block pool behind it. The mapping is created zeroed and
//! stays alive for the lifetime of the cache; nothing in it is ever moved.

use std::io;

use memmap2::MmapMut;

/// The off-heap region owning the mapping and handing out raw addresses.
pub struct Region {
    mmap: MmapMut,
    base: *mut u8,
    table_bytes: usize,
    pool_bytes: usize,
}

// All mutation happens through raw pointers into the mapping, guarded by the
// partition/entry/free-list protocols layered on top.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map `table_bytes + pool_bytes` of zeroed anonymous memory.
    pub fn new(table_bytes: usize, pool_bytes: usize) -> io::Result<Self> {
        let mut mmap = MmapMut::map_anon(table_bytes + pool_bytes)?;
        let base = mmap.as_mut_ptr();
        Ok(Region {
            mmap,
            base,
            table_bytes,
            pool_bytes,
        })
    }

    /// Address of the partition table (start of the region).
    pub fn table_base(&self) -> u64 {
        self.base as u64
    }

    /// Address of the first block of the pool.
    pub fn pool_base(&self) -> u64 {
        self.base as u64 + self.table_bytes as u64
    }

    /// One past the last pool address.
    pub fn pool_end(&self) -> u64 {
        self.pool_base() + self.pool_bytes as u64
    }

    /// Total mapped bytes.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_layout_is_contiguous() {
        let region = Region::new(512, 4096).unwrap();
        assert_eq!(region.len(), 512 + 4096);
        assert_eq!(region.pool_base(), region.table_base() + 512);
        assert_eq!(region.pool_end(), region.pool_base() + 4096);
    }

    #[test]
    fn region_is_zeroed() {
        let region = Region::new(64, 1024).unwrap();
        let base = region.table_base() as *const u8;
        for i in 0..region.len() {
            assert_eq!(unsafe { *base.add(i) }, 0);
        }
    }
}
