//! Cache construction: option validation and normalization.
//!
//! Every option is checked and normalized here, before any memory is mapped.
//! Out-of-range values are rejected; values that merely miss an alignment
//! requirement are adjusted with a warning so configurations stay explicit.

use std::time::Duration;

use crate::bytes::CacheSerializer;
use crate::cache::{BlockCache, Core};
use crate::error::CacheError;
use crate::raw::layout::{
    MAX_BLOCK_SIZE, MAX_HASH_TABLE_SIZE, MIN_BLOCK_SIZE, MIN_CAPACITY, MIN_HASH_TABLE_SIZE,
};
use crate::typed::TypedCache;

const DEFAULT_BLOCK_SIZE: usize = 2048;
const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;
const DEFAULT_LRU_WARN_TRIGGER: usize = 5000;

/// Builder for [`BlockCache`] and [`TypedCache`].
///
/// ```
/// use blockcache::builder::CacheBuilder;
///
/// let cache = CacheBuilder::new()
///     .capacity(16 * 1024 * 1024)
///     .block_size(1024)
///     .cleanup_trigger(0.25)
///     .cleanup_check_interval_ms(30_000)
///     .build()
///     .unwrap();
/// assert_eq!(cache.block_size(), 1024);
/// ```
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    block_size: usize,
    capacity: u64,
    hash_table_size: Option<u32>,
    cleanup_trigger: f64,
    cleanup_check_interval_ms: u64,
    lru_list_warn_trigger: usize,
    statistics_enabled: bool,
}

impl CacheBuilder {
    pub fn new() -> Self {
        CacheBuilder {
            block_size: DEFAULT_BLOCK_SIZE,
            capacity: DEFAULT_CAPACITY,
            hash_table_size: None,
            cleanup_trigger: 0.0,
            cleanup_check_interval_ms: 0,
            lru_list_warn_trigger: DEFAULT_LRU_WARN_TRIGGER,
            statistics_enabled: true,
        }
    }

    /// Block size in bytes; rounded up to the next power of two in
    /// `[512, 262144]`.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Pool capacity in bytes; rounded down to a block-size multiple, at
    /// least 8 MiB.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Partition count; rounded up to a power of two in `[32, 4194304]`.
    /// When unset, sized from the block count.
    pub fn hash_table_size(mut self, hash_table_size: u32) -> Self {
        self.hash_table_size = Some(hash_table_size);
        self
    }

    /// Free-space fraction at or below which cleanup evicts, in `[0, 1]`.
    /// Zero disables eviction.
    pub fn cleanup_trigger(mut self, cleanup_trigger: f64) -> Self {
        self.cleanup_trigger = cleanup_trigger;
        self
    }

    /// Interval of the background cleanup check. Required (> 0) exactly when
    /// a cleanup trigger is set.
    pub fn cleanup_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.cleanup_check_interval_ms = interval_ms;
        self
    }

    /// Partition list length above which a one-shot warning is logged.
    pub fn lru_list_warn_trigger(mut self, trigger: usize) -> Self {
        self.lru_list_warn_trigger = trigger;
        self
    }

    /// Enable hit/miss counters.
    pub fn statistics_enabled(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    /// Validate, normalize, map the region, and start the cleanup timer.
    pub fn build(self) -> Result<BlockCache, CacheError> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(CacheError::Config(format!(
                "block size must be at least {MIN_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(CacheError::Config(format!(
                "block size must be at most {MAX_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        let block_size = self.block_size.next_power_of_two();
        if block_size != self.block_size {
            tracing::warn!(
                configured = self.block_size,
                effective = block_size,
                "block size rounded up to a power of two"
            );
        }

        let capacity = self.capacity / block_size as u64 * block_size as u64;
        if capacity < MIN_CAPACITY {
            return Err(CacheError::Config(format!(
                "capacity must be at least {MIN_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if capacity != self.capacity {
            tracing::warn!(
                configured = self.capacity,
                effective = capacity,
                "capacity rounded down to a block-size multiple"
            );
        }

        let hash_table_size = match self.hash_table_size {
            Some(requested) => {
                if requested < MIN_HASH_TABLE_SIZE {
                    return Err(CacheError::Config(format!(
                        "hash table size must be at least {MIN_HASH_TABLE_SIZE}, got {requested}"
                    )));
                }
                if requested > MAX_HASH_TABLE_SIZE {
                    return Err(CacheError::Config(format!(
                        "hash table size must be at most {MAX_HASH_TABLE_SIZE}, got {requested}"
                    )));
                }
                let effective = requested.next_power_of_two();
                if effective != requested {
                    tracing::warn!(
                        configured = requested,
                        effective,
                        "hash table size rounded up to a power of two"
                    );
                }
                effective
            }
            None => {
                let block_count = capacity / block_size as u64;
                ((block_count / 16) as u32)
                    .next_power_of_two()
                    .clamp(MIN_HASH_TABLE_SIZE, MAX_HASH_TABLE_SIZE)
            }
        };

        if !(0.0..=1.0).contains(&self.cleanup_trigger) {
            return Err(CacheError::Config(format!(
                "cleanup trigger must be within [0, 1], got {:.2}",
                self.cleanup_trigger
            )));
        }
        let trigger_set = self.cleanup_trigger > 0.0;
        let interval_set = self.cleanup_check_interval_ms > 0;
        if trigger_set != interval_set {
            return Err(CacheError::Config(format!(
                "incompatible settings: cleanup-check-interval {} vs cleanup-trigger {:.2}",
                self.cleanup_check_interval_ms, self.cleanup_trigger
            )));
        }

        let lru_list_warn_trigger = self.lru_list_warn_trigger.max(1);

        let core = Core::new(
            block_size,
            capacity,
            hash_table_size,
            self.cleanup_trigger,
            lru_list_warn_trigger,
            self.statistics_enabled,
        )?;

        let interval = interval_set.then(|| Duration::from_millis(self.cleanup_check_interval_ms));
        let cache = BlockCache::assemble(core, interval)?;
        tracing::info!(
            capacity,
            hash_table_size,
            block_size,
            "initialized off-heap cache"
        );
        Ok(cache)
    }

    /// Like [`Self::build`], wrapping the cache in a serializing facade.
    pub fn build_typed<K, V, KS, VS>(
        self,
        key_serializer: KS,
        value_serializer: VS,
    ) -> Result<TypedCache<K, V, KS, VS>, CacheError>
    where
        KS: CacheSerializer<K>,
        VS: CacheSerializer<V>,
    {
        Ok(TypedCache::new(
            self.build()?,
            key_serializer,
            value_serializer,
        ))
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
