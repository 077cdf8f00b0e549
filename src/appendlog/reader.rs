//! Log reader implementation: random access by record id and sequential scans.

use super::frame::{check_file_header, FrameHeader, FILE_HEADER_SIZE, FRAME_HEADER_SIZE};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Reads frames from the log file
pub struct LogReader {
    /// Buffered reader for efficient I/O
    reader: BufReader<File>,
    /// Offset of the next frame for sequential reads
    position: u64,
    /// File length when the reader was opened; bounds sequential reads
    file_len: u64,
}

impl LogReader {
    /// Open a log file for reading and validate its header
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; FILE_HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::corruption("Log file is shorter than its header"));
            }
            Err(e) => return Err(Error::Io(e)),
        }
        check_file_header(&header)?;

        Ok(Self { reader, position: FILE_HEADER_SIZE as u64, file_len })
    }

    /// Read the payload of the frame starting at `offset`.
    ///
    /// `limit` is the published end of the log; a frame reaching past it is
    /// reported as corruption rather than read.
    pub fn read_at(&mut self, offset: u64, limit: u64) -> Result<Vec<u8>> {
        if offset < FILE_HEADER_SIZE as u64 || offset + FRAME_HEADER_SIZE as u64 > limit {
            return Err(Error::invalid_argument(format!(
                "Record id {} is outside the log (end {})",
                offset, limit
            )));
        }

        self.reader.seek(SeekFrom::Start(offset))?;
        let header = self.read_header()?;
        if offset + header.frame_size() > limit {
            return Err(Error::corruption(format!(
                "Record {} claims {} bytes past the end of the log",
                offset, header.length
            )));
        }

        let payload = self.read_payload(&header)?;
        self.position = offset + header.frame_size();
        Ok(payload)
    }

    /// Read the next frame in sequence.
    ///
    /// Returns `None` on a clean end of file. A frame cut short or failing
    /// its checksum is reported as corruption, and `position()` then still
    /// points at that frame.
    pub fn read_next(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        let offset = self.position;

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < FRAME_HEADER_SIZE {
            match self.reader.read(&mut raw[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(Error::corruption(format!("Torn frame header at {}", offset))),
                n => filled += n,
            }
        }

        let header = FrameHeader::decode(&raw)?;
        if offset + header.frame_size() > self.file_len {
            return Err(Error::corruption(format!(
                "Frame at {} claims {} bytes past the end of the file",
                offset, header.length
            )));
        }
        let payload = self.read_payload(&header)?;
        self.position = offset + header.frame_size();
        Ok(Some((offset, payload)))
    }

    fn read_header(&mut self) -> Result<FrameHeader> {
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        self.reader.read_exact(&mut raw).map_err(truncated)?;
        FrameHeader::decode(&raw)
    }

    fn read_payload(&mut self, header: &FrameHeader) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; header.length as usize];
        self.reader.read_exact(&mut payload).map_err(truncated)?;
        header.verify(&payload)?;
        Ok(payload)
    }

    /// Get the current read position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Seek to a frame boundary for sequential reads
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let pos = pos.max(FILE_HEADER_SIZE as u64);
        self.reader.seek(SeekFrom::Start(pos))?;
        self.position = pos;
        Ok(())
    }
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::corruption("Frame is truncated")
    } else {
        Error::Io(e)
    }
}
