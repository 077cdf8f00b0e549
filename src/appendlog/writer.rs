//! Log writer implementation.

use super::frame::{encode_file_header, FILE_HEADER_SIZE};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends frames to the end of the log file
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Current file size, i.e. the offset the next frame lands at
    file_size: u64,
}

impl LogWriter {
    /// Create a new log writer
    ///
    /// Opens the file in append mode, creating it (with its header) if it
    /// doesn't exist. The caller is responsible for validating an existing
    /// header and trimming a torn tail before handing the file over.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();
        let mut writer = Self { path, writer: BufWriter::new(file), file_size };

        if writer.file_size == 0 {
            writer.writer.write_all(&encode_file_header())?;
            writer.file_size = FILE_HEADER_SIZE as u64;
            writer.sync()?;
        }

        Ok(writer)
    }

    /// Append an encoded frame and return the offset it was written at.
    ///
    /// The frame is pushed through to the OS before returning, so separate
    /// read handles observe it immediately.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let offset = self.file_size;
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        self.file_size += frame.len() as u64;
        Ok(offset)
    }

    /// Sync the log to disk
    ///
    /// Ensures all buffered data is written and fsync'd to persistent storage.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Get the current file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the writer, flushing all data
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}
