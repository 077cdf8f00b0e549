//! Log file layout.
//!
//! The file starts with a fixed header, followed by frames:
//! - Header (16 bytes): magic (8) + version (u32) + reserved (u32)
//! - Frame: payload length (u32) + CRC32 of payload (u32) + payload
//!
//! A record id is the file offset of its frame. Because of the header no
//! record id is ever 0.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Magic bytes at the start of every log file
pub const MAGIC: [u8; 8] = *b"HASHLOG\0";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of the file header (magic + version + reserved)
pub const FILE_HEADER_SIZE: usize = 16;

/// Size of the frame header (length + checksum)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Encode the file header
pub fn encode_file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE);
    buf.put_slice(&MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    buf.put_u32_le(0);

    let mut header = [0u8; FILE_HEADER_SIZE];
    header.copy_from_slice(&buf);
    header
}

/// Validate a file header read from disk
pub fn check_file_header(mut data: &[u8]) -> Result<()> {
    if data.len() < FILE_HEADER_SIZE {
        return Err(Error::corruption(format!("Log header too short: {} bytes", data.len())));
    }
    if data[..MAGIC.len()] != MAGIC {
        return Err(Error::corruption("Bad log magic"));
    }
    data.advance(MAGIC.len());

    let version = data.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(Error::corruption(format!("Unsupported log version: {}", version)));
    }
    Ok(())
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub length: u32,
    /// CRC32 of the payload
    pub checksum: u32,
}

impl FrameHeader {
    /// Decode a frame header
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(Error::corruption(format!("Frame header too short: {} bytes", data.len())));
        }
        let length = data.get_u32_le();
        let checksum = data.get_u32_le();
        Ok(Self { length, checksum })
    }

    /// Total size of the frame on disk
    pub fn frame_size(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + self.length as u64
    }

    /// Check a payload against this header
    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.length as usize {
            return Err(Error::corruption(format!(
                "Incomplete frame: expected {} bytes, got {}",
                self.length,
                payload.len()
            )));
        }
        let actual = crc32fast::hash(payload);
        if actual != self.checksum {
            return Err(Error::corruption(format!(
                "Checksum mismatch: expected {:#x}, got {:#x}",
                self.checksum, actual
            )));
        }
        Ok(())
    }
}

/// Build a complete frame whose payload is produced in place by `fill`.
///
/// The payload region handed to `fill` is zeroed and exactly `size` bytes long.
pub fn build_frame<F>(size: usize, fill: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut [u8]) -> Result<()>,
{
    if size > MAX_PAYLOAD_SIZE {
        return Err(Error::invalid_argument(format!("Record of {} bytes is too large", size)));
    }

    let mut frame = vec![0u8; FRAME_HEADER_SIZE + size];
    fill(&mut frame[FRAME_HEADER_SIZE..])?;

    let checksum = crc32fast::hash(&frame[FRAME_HEADER_SIZE..]);
    let mut header = &mut frame[..FRAME_HEADER_SIZE];
    header.put_u32_le(size as u32);
    header.put_u32_le(checksum);

    Ok(frame)
}
