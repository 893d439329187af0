//! Byte-level capability traits between the storage engine and typed
//! callers.
//!
//! The engine deals only in hashes and byte streams: keys and values enter
//! as a [`BytesSource`] (sized, random access), values leave through a
//! [`BytesSink`]. The typed facade converts to and from these with a
//! [`CacheSerializer`].

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::io::{self, Read, Write};

/// Readable, sized byte content with a stable content hash.
pub trait BytesSource {
    /// Total byte length.
    fn size(&self) -> usize;

    /// Borrow `len` bytes starting at `offset`. `offset + len` never exceeds
    /// `size()`.
    fn bytes(&self, offset: usize, len: usize) -> &[u8];

    /// Deterministic hash of the full content, used to pick the partition.
    fn hash_code(&self) -> u32 {
        let mut hasher = DefaultHasher::new();
        hasher.write(self.bytes(0, self.size()));
        hasher.finish() as u32
    }
}

impl BytesSource for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self[offset..offset + len]
    }
}

impl BytesSource for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self[offset..offset + len]
    }
}

/// Owned byte content, typically a serialized key, with its hash computed
/// once up front.
pub struct ByteArraySource {
    data: Vec<u8>,
    hash: u32,
}

impl ByteArraySource {
    pub fn new(data: Vec<u8>) -> Self {
        let hash = data.hash_code();
        ByteArraySource { data, hash }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BytesSource for ByteArraySource {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    fn hash_code(&self) -> u32 {
        self.hash
    }
}

/// Destination for a value's bytes, written in ascending offset order.
pub trait BytesSink {
    /// Accept `bytes` at `offset` within the value.
    fn put_bytes(&mut self, offset: usize, bytes: &[u8]) -> io::Result<()>;
}

/// Growable sink collecting the value into a `Vec<u8>`.
#[derive(Debug, Default)]
pub struct VecSink {
    buf: Vec<u8>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl BytesSink for VecSink {
    fn put_bytes(&mut self, offset: usize, bytes: &[u8]) -> io::Result<()> {
        if self.buf.len() < offset {
            self.buf.resize(offset, 0);
        }
        if self.buf.len() == offset {
            self.buf.extend_from_slice(bytes);
        } else {
            let end = offset + bytes.len();
            if self.buf.len() < end {
                self.buf.resize(end, 0);
            }
            self.buf[offset..end].copy_from_slice(bytes);
        }
        Ok(())
    }
}

/// Converts typed keys and values to and from byte streams.
pub trait CacheSerializer<T> {
    /// Exact byte length `serialize` will produce for `value`.
    fn serialized_size(&self, value: &T) -> usize;

    /// Write the serialized form of `value` to `out`.
    fn serialize(&self, value: &T, out: &mut dyn Write) -> io::Result<()>;

    /// Reconstruct a value from its serialized form.
    fn deserialize(&self, input: &mut dyn Read) -> io::Result<T>;
}

/// Identity serializer for raw byte vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl CacheSerializer<Vec<u8>> for BytesSerializer {
    fn serialized_size(&self, value: &Vec<u8>) -> usize {
        value.len()
    }

    fn serialize(&self, value: &Vec<u8>, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(value)
    }

    fn deserialize(&self, input: &mut dyn Read) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// UTF-8 string serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl CacheSerializer<String> for StringSerializer {
    fn serialized_size(&self, value: &String) -> usize {
        value.len()
    }

    fn serialize(&self, value: &String, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(value.as_bytes())
    }

    fn deserialize(&self, input: &mut dyn Read) -> io::Result<String> {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
