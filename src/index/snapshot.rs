//! Index snapshot file.
//!
//! Format:
//! ```text
//! [magic: 8 bytes]
//! [version: u32]
//! [body_len: u32]
//! [body: bincode(SnapshotBody)]
//! [checksum: u32]   // CRC32 of body
//! ```
//!
//! Snapshots are written to a temporary file, fsync'd and renamed over the
//! previous one, so a crash leaves either the old or the new snapshot.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes of an index snapshot
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"HLINDEX\0";

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

const PREFIX_SIZE: usize = 16;
const CHECKSUM_SIZE: usize = 4;

/// Persisted state of the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    /// Log length the bindings cover
    pub watermark: u64,
    /// All (hash, id) bindings
    pub bindings: Vec<(u32, u32)>,
}

impl SnapshotBody {
    /// Encode the complete snapshot file contents
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| Error::invalid_argument("index snapshot larger than 4GB"))?;

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + body.len() + CHECKSUM_SIZE);
        buf.put_slice(&SNAPSHOT_MAGIC);
        buf.put_u32_le(SNAPSHOT_VERSION);
        buf.put_u32_le(body_len);
        buf.put_slice(&body);
        buf.put_u32_le(crc32fast::hash(&body));
        Ok(buf.to_vec())
    }

    /// Decode and validate snapshot file contents
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PREFIX_SIZE + CHECKSUM_SIZE {
            return Err(Error::corruption(format!(
                "Index snapshot too short: {} bytes",
                data.len()
            )));
        }
        if data[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(Error::corruption("Bad index snapshot magic"));
        }

        let mut prefix = &data[SNAPSHOT_MAGIC.len()..PREFIX_SIZE];
        let version = prefix.get_u32_le();
        if version != SNAPSHOT_VERSION {
            return Err(Error::corruption(format!(
                "Unsupported index snapshot version: {}",
                version
            )));
        }
        let body_len = prefix.get_u32_le() as usize;

        if data.len() != PREFIX_SIZE + body_len + CHECKSUM_SIZE {
            return Err(Error::corruption(format!(
                "Index snapshot length mismatch: body {} bytes, file {} bytes",
                body_len,
                data.len()
            )));
        }

        let body = &data[PREFIX_SIZE..PREFIX_SIZE + body_len];
        let mut trailer = &data[PREFIX_SIZE + body_len..];
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::corruption(format!(
                "Checksum mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        Ok(bincode::deserialize(body)?)
    }

    /// Atomically replace the snapshot at `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let encoded = self.encode()?;
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load the snapshot at `path`; `None` if there is none yet
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.snapshot");

        let body = SnapshotBody { watermark: 4096, bindings: vec![(7, 16), (7, 40), (9, 64)] };
        body.write_to(&path).unwrap();

        assert_eq!(SnapshotBody::read_from(&path).unwrap(), Some(body));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        assert_eq!(SnapshotBody::read_from(&dir.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_corrupted_snapshot() {
        let body = SnapshotBody { watermark: 1, bindings: vec![(1, 16)] };
        let mut encoded = body.encode().unwrap();
        let last_body_byte = encoded.len() - CHECKSUM_SIZE - 1;
        encoded[last_body_byte] ^= 0xFF;
        assert!(matches!(SnapshotBody::decode(&encoded), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_truncated_snapshot() {
        let encoded = SnapshotBody::default().encode().unwrap();
        assert!(SnapshotBody::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(SnapshotBody::decode(&encoded[..3]).is_err());
    }
}
