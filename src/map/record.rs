//! Entry record codec.
//!
//! Layout of one log record:
//! ```text
//! [header: i32 LE]   |header| = key size; negative = value absent (tombstone)
//! [key: |header| bytes]
//! [value: rest of the record, only when header >= 0]
//! ```
//!
//! The value carries no length of its own; it is everything after the key.
//! A zero-length key is rejected because `-0 == 0` would leave the tombstone
//! bit nowhere to live.

use crate::descriptor::{Descriptor, KnownSizeWriter};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Size of the record header
pub const HEADER_SIZE: usize = 4;

/// Plan for writing one record; knows the full record size before writing.
pub struct RecordWriter<'a> {
    header: i32,
    key: KnownSizeWriter<'a>,
    value: Option<KnownSizeWriter<'a>>,
}

impl<'a> RecordWriter<'a> {
    /// Plan the record for `key` and an optional `value`.
    pub fn new<K, V>(
        key_desc: &dyn Descriptor<K>,
        value_desc: &dyn Descriptor<V>,
        key: &'a K,
        value: Option<&'a V>,
    ) -> Result<Self> {
        let key = key_desc.writer_for(key);
        let key_size = key.record_size();
        if key_size == 0 {
            return Err(Error::invalid_argument("key encodes to zero bytes"));
        }
        let magnitude = i32::try_from(key_size).map_err(|_| {
            Error::invalid_argument(format!(
                "key of {} bytes does not fit a record header",
                key_size
            ))
        })?;

        let value = value.map(|v| value_desc.writer_for(v));
        let header = if value.is_some() { magnitude } else { -magnitude };
        Ok(Self { header, key, value })
    }

    /// Total record size, header included.
    pub fn record_size(&self) -> usize {
        HEADER_SIZE
            + self.key.record_size()
            + self.value.as_ref().map_or(0, |v| v.record_size())
    }

    /// Whether this record is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Fill `buf`, which must be exactly `record_size()` bytes.
    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.record_size() {
            return Err(Error::internal(format!(
                "record needs {} bytes, buffer has {}",
                self.record_size(),
                buf.len()
            )));
        }

        let (mut header, rest) = buf.split_at_mut(HEADER_SIZE);
        header.put_i32_le(self.header);

        let (key, value) = rest.split_at_mut(self.key.record_size());
        self.key.write(key)?;
        if let Some(writer) = &self.value {
            writer.write(value)?;
        }
        Ok(())
    }
}

/// Undecoded view of a record: key bytes and, unless a tombstone, value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    /// Encoded key
    pub key: &'a [u8],
    /// Encoded value, `None` for a tombstone
    pub value: Option<&'a [u8]>,
}

impl<'a> RecordView<'a> {
    /// Split a raw record into its regions.
    pub fn parse(record: &'a [u8]) -> Result<Self> {
        if record.len() < HEADER_SIZE {
            return Err(Error::corruption(format!(
                "record of {} bytes has no header",
                record.len()
            )));
        }
        let mut header_bytes = &record[..HEADER_SIZE];
        let header = header_bytes.get_i32_le();

        let key_size = header.unsigned_abs() as usize;
        if key_size == 0 {
            return Err(Error::corruption("record header declares an empty key"));
        }
        let body = &record[HEADER_SIZE..];
        if body.len() < key_size {
            return Err(Error::corruption(format!(
                "record declares a {} byte key but holds {} bytes",
                key_size,
                body.len()
            )));
        }

        let (key, rest) = body.split_at(key_size);
        if header < 0 {
            if !rest.is_empty() {
                return Err(Error::corruption(format!(
                    "tombstone record has {} trailing bytes",
                    rest.len()
                )));
            }
            return Ok(Self { key, value: None });
        }
        Ok(Self { key, value: Some(rest) })
    }

    /// Whether the value is absent
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Decode the key.
    pub fn decode_key<K>(&self, key_desc: &dyn Descriptor<K>) -> Result<K> {
        key_desc.read(self.key)
    }

    /// Decode the value, if present.
    pub fn decode_value<V>(&self, value_desc: &dyn Descriptor<V>) -> Result<Option<V>> {
        self.value.map(|bytes| value_desc.read(bytes)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BytesDescriptor, StringDescriptor};

    fn encode(key: &String, value: Option<&Vec<u8>>) -> Vec<u8> {
        let writer = RecordWriter::new(&StringDescriptor, &BytesDescriptor, key, value).unwrap();
        let mut buf = vec![0u8; writer.record_size()];
        writer.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_present_value_layout() {
        let key = "abc".to_string();
        let value = b"xy".to_vec();
        let record = encode(&key, Some(&value));

        assert_eq!(record, vec![3, 0, 0, 0, b'a', b'b', b'c', b'x', b'y']);
        let view = RecordView::parse(&record).unwrap();
        assert_eq!(view.decode_key(&StringDescriptor).unwrap(), "abc");
        assert_eq!(view.decode_value(&BytesDescriptor).unwrap(), Some(value));
    }

    #[test]
    fn test_tombstone_layout() {
        let key = "abc".to_string();
        let value = b"v".to_vec();
        let writer = RecordWriter::new(&StringDescriptor, &BytesDescriptor, &key, None).unwrap();
        assert!(writer.is_tombstone());
        let writer =
            RecordWriter::new(&StringDescriptor, &BytesDescriptor, &key, Some(&value)).unwrap();
        assert!(!writer.is_tombstone());

        let record = encode(&key, None);

        assert_eq!(record[..HEADER_SIZE], (-3i32).to_le_bytes());
        assert_eq!(record.len(), HEADER_SIZE + 3);
        let view = RecordView::parse(&record).unwrap();
        assert!(view.is_tombstone());
        assert_eq!(view.decode_value(&BytesDescriptor).unwrap(), None);
    }

    #[test]
    fn test_empty_value_is_not_a_tombstone() {
        let key = "k".to_string();
        let empty = Vec::new();
        let record = encode(&key, Some(&empty));

        let view = RecordView::parse(&record).unwrap();
        assert!(!view.is_tombstone());
        assert_eq!(view.decode_value(&BytesDescriptor).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let key = String::new();
        let value = b"v".to_vec();
        let result = RecordWriter::new(&StringDescriptor, &BytesDescriptor, &key, Some(&value));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_encoding_is_repeatable() {
        let key = "same".to_string();
        let value = b"bytes".to_vec();
        assert_eq!(encode(&key, Some(&value)), encode(&key, Some(&value)));
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(RecordView::parse(&[1, 0]), Err(Error::Corruption(_))));
        // Key longer than the record
        assert!(matches!(RecordView::parse(&[9, 0, 0, 0, b'a']), Err(Error::Corruption(_))));
        // Empty key
        assert!(matches!(RecordView::parse(&[0, 0, 0, 0]), Err(Error::Corruption(_))));
        // Tombstone with a value attached
        let mut record = (-1i32).to_le_bytes().to_vec();
        record.extend_from_slice(b"kv");
        assert!(matches!(RecordView::parse(&record), Err(Error::Corruption(_))));
    }
}
