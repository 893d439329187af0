//! Off-heap, block-allocated key/value cache.
//!
//! The cache keeps serialized entries in one memory-mapped region outside
//! the managed heap, split into a partition table and a pool of fixed-size
//! blocks. Each partition owns an LRU chain guarded by a word spinlock; the
//! free pool is a lock-free stack; eviction trims the cold end of every
//! partition when free space runs low.
//!
//! ```
//! use blockcache::builder::CacheBuilder;
//! use blockcache::bytes::VecSink;
//!
//! let cache = CacheBuilder::new()
//!     .capacity(8 * 1024 * 1024)
//!     .block_size(512)
//!     .build()
//!     .unwrap();
//!
//! cache.put(0x1, b"a".as_slice(), b"A".as_slice(), None).unwrap();
//! let mut sink = VecSink::new();
//! assert!(cache.get(0x1, b"a".as_slice(), &mut sink).unwrap());
//! assert_eq!(sink.as_slice(), b"A");
//! ```

pub mod builder;
pub mod bytes;
pub mod cache;
pub mod error;
pub mod stats;
pub mod typed;

mod raw;

pub use builder::CacheBuilder;
pub use bytes::{BytesSink, BytesSource, CacheSerializer, VecSink};
pub use cache::{BlockCache, PutOutcome};
pub use error::CacheError;
pub use stats::{CacheStats, ExtendedCacheStats};
pub use typed::TypedCache;
