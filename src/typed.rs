//! Typed facade over the untyped cache.
//!
//! Keys and values pass through [`CacheSerializer`]s; the partition hash is
//! derived from the serialized key bytes. Serializers always run outside the
//! engine's locks: values are streamed into a chain before it is published,
//! and deserialized while only the per-entry lock is held.

use std::io;
use std::marker::PhantomData;
use std::time::Instant;

use crate::bytes::{ByteArraySource, BytesSource, CacheSerializer};
use crate::cache::BlockCache;
use crate::error::CacheError;
use crate::stats::CacheStats;

/// Serializing cache for `K` keys and `V` values.
pub struct TypedCache<K, V, KS, VS>
where
    KS: CacheSerializer<K>,
    VS: CacheSerializer<V>,
{
    cache: BlockCache,
    key_serializer: KS,
    value_serializer: VS,
    _marker: PhantomData<fn(&K, &V)>,
}

impl<K, V, KS, VS> TypedCache<K, V, KS, VS>
where
    KS: CacheSerializer<K>,
    VS: CacheSerializer<V>,
{
    pub fn new(cache: BlockCache, key_serializer: KS, value_serializer: VS) -> Self {
        TypedCache {
            cache,
            key_serializer,
            value_serializer,
            _marker: PhantomData,
        }
    }

    /// The wrapped untyped cache.
    pub fn raw(&self) -> &BlockCache {
        &self.cache
    }

    fn key_source(&self, key: &K) -> Result<ByteArraySource, CacheError> {
        let size = self.key_serializer.serialized_size(key);
        if size == 0 {
            return Err(CacheError::InvalidArgument(
                "serialized key must not be empty",
            ));
        }
        let mut buf = Vec::with_capacity(size);
        self.key_serializer.serialize(key, &mut buf)?;
        Ok(ByteArraySource::new(buf))
    }

    /// Store `value` under `key`. When the pool cannot hold the entry the
    /// put is silently dropped.
    pub fn put(&self, key: &K, value: &V) -> Result<(), CacheError> {
        let key_source = self.key_source(key)?;
        let value_len = self.value_serializer.serialized_size(value);
        self.cache.core().put_with_writer(
            key_source.hash_code(),
            &key_source,
            value_len,
            |out| self.value_serializer.serialize(value, out),
            None,
        )?;
        Ok(())
    }

    /// Look up and deserialize the value for `key`, promoting the entry.
    pub fn get_if_present(&self, key: &K) -> Result<Option<V>, CacheError> {
        let key_source = self.key_source(key)?;
        self.cache
            .core()
            .get_with(key_source.hash_code(), &key_source, |input| {
                self.value_serializer.deserialize(input)
            })
    }

    /// Return the cached value or run `loader`, caching its result. The
    /// loader runs outside all cache locks; its outcome and duration feed
    /// the load counters.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> io::Result<V>,
    {
        if let Some(value) = self.get_if_present(key)? {
            return Ok(value);
        }
        let start = Instant::now();
        match loader() {
            Ok(value) => {
                self.cache
                    .core()
                    .record_load_success(start.elapsed().as_millis() as u64);
                self.put(key, &value)?;
                Ok(value)
            }
            Err(e) => {
                self.cache
                    .core()
                    .record_load_exception(start.elapsed().as_millis() as u64);
                Err(CacheError::Io(e))
            }
        }
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &K) -> Result<bool, CacheError> {
        let key_source = self.key_source(key)?;
        self.cache.remove(key_source.hash_code(), &key_source)
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all()
    }

    /// Store every pair, dropping those the pool cannot hold.
    pub fn put_all<'a, I>(&self, entries: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a,
    {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Look up every key, returning the pairs that were present.
    pub fn get_all_present<I>(&self, keys: I) -> Result<Vec<(K, V)>, CacheError>
    where
        I: IntoIterator<Item = K>,
    {
        let mut present = Vec::new();
        for key in keys {
            if let Some(value) = self.get_if_present(&key)? {
                present.push((key, value));
            }
        }
        Ok(present)
    }

    /// Deserialized keys of roughly the `n` most recently used entries.
    pub fn hot_keys(&self, n: usize) -> Result<Vec<K>, CacheError> {
        self.cache
            .hot_keys(n)
            .into_iter()
            .map(|bytes| {
                self.key_serializer
                    .deserialize(&mut bytes.as_slice())
                    .map_err(CacheError::from)
            })
            .collect()
    }

    /// Number of entries.
    pub fn size(&self) -> u64 {
        self.cache.size()
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Close the underlying cache.
    pub fn close(&self) {
        self.cache.close()
    }
}
