//! Key and value codecs.
//!
//! A [`Descriptor`] tells the map how to hash, compare, serialize and
//! deserialize one type. Serialization goes through a [`KnownSizeWriter`] whose
//! byte length is known before anything is written, so a whole log record can
//! be sized and allocated in a single pass.

use crate::error::{Error, Result};

/// Hashing, equality and (de)serialization for values of type `T`.
pub trait Descriptor<T>: Send + Sync {
    /// 32-bit hash of `value`. Equal values must hash equally.
    fn hash_code(&self, value: &T) -> i32;

    /// Equality as the map understands it.
    fn is_equal(&self, a: &T, b: &T) -> bool;

    /// Decodes a value occupying the whole of `buf`.
    fn read(&self, buf: &[u8]) -> Result<T>;

    /// Returns a writer that knows the encoded size of `value` up front.
    fn writer_for<'a>(&self, value: &'a T) -> KnownSizeWriter<'a>;
}

/// Serializer for one value with an exact, precomputed encoded size.
///
/// `write` may be called more than once and always produces the same bytes.
pub struct KnownSizeWriter<'a> {
    size: usize,
    fill: Box<dyn Fn(&mut [u8]) -> Result<()> + 'a>,
}

impl<'a> KnownSizeWriter<'a> {
    /// Creates a writer producing exactly `size` bytes via `fill`.
    pub fn new(size: usize, fill: impl Fn(&mut [u8]) -> Result<()> + 'a) -> Self {
        Self { size, fill: Box::new(fill) }
    }

    /// Writer that copies an already-encoded byte slice.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self::new(bytes.len(), move |buf| {
            buf.copy_from_slice(bytes);
            Ok(())
        })
    }

    /// Encoded size in bytes.
    pub fn record_size(&self) -> usize {
        self.size
    }

    /// Fills `buf`, which must be exactly `record_size()` bytes long.
    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.size {
            return Err(Error::internal(format!(
                "writer expects {} bytes, buffer has {}",
                self.size,
                buf.len()
            )));
        }
        (self.fill)(buf)
    }
}

/// Raw byte strings, stored verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDescriptor;

impl Descriptor<Vec<u8>> for BytesDescriptor {
    fn hash_code(&self, value: &Vec<u8>) -> i32 {
        crc32fast::hash(value) as i32
    }

    fn is_equal(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a == b
    }

    fn read(&self, buf: &[u8]) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }

    fn writer_for<'a>(&self, value: &'a Vec<u8>) -> KnownSizeWriter<'a> {
        KnownSizeWriter::from_slice(value)
    }
}

/// UTF-8 strings, stored as their bytes without a terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDescriptor;

impl Descriptor<String> for StringDescriptor {
    fn hash_code(&self, value: &String) -> i32 {
        crc32fast::hash(value.as_bytes()) as i32
    }

    fn is_equal(&self, a: &String, b: &String) -> bool {
        a == b
    }

    fn read(&self, buf: &[u8]) -> Result<String> {
        String::from_utf8(buf.to_vec())
            .map_err(|e| Error::corruption(format!("invalid UTF-8 in stored string: {}", e)))
    }

    fn writer_for<'a>(&self, value: &'a String) -> KnownSizeWriter<'a> {
        KnownSizeWriter::from_slice(value.as_bytes())
    }
}

/// Unsigned 64-bit integers, 8 bytes little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Descriptor;

impl Descriptor<u64> for U64Descriptor {
    fn hash_code(&self, value: &u64) -> i32 {
        (*value ^ (*value >> 32)) as i32
    }

    fn is_equal(&self, a: &u64, b: &u64) -> bool {
        a == b
    }

    fn read(&self, buf: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = buf
            .try_into()
            .map_err(|_| Error::corruption(format!("u64 needs 8 bytes, got {}", buf.len())))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn writer_for<'a>(&self, value: &'a u64) -> KnownSizeWriter<'a> {
        KnownSizeWriter::new(8, move |buf| {
            buf.copy_from_slice(&value.to_le_bytes());
            Ok(())
        })
    }
}
