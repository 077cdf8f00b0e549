//! Append-only record log.
//!
//! Records are immutable, variable-length byte strings. Each append returns a
//! record id that can later be used for random reads; ids grow monotonically.
//!
//! ## Architecture
//!
//! - **Frame format**: each record is framed with its length and a CRC32
//! - **Record ids**: the file offset of the frame (never 0, the file has a header)
//! - **Recovery**: on open the log is scanned and a torn tail is truncated away
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hashlog::appendlog::{AppendOnlyLog, FileLog};
//!
//! # fn main() -> Result<(), hashlog::Error> {
//! let log = FileLog::open("entries.log")?;
//! let id = log.append(5, |buf| {
//!     buf.copy_from_slice(b"hello");
//!     Ok(())
//! })?;
//! let bytes = log.read(id, |record| Ok(record.to_vec()))?;
//! assert_eq!(bytes, b"hello");
//! log.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod frame;
pub mod reader;
pub mod writer;

pub use reader::LogReader;
pub use writer::LogWriter;

use crate::error::{Error, Result};
use frame::{build_frame, FILE_HEADER_SIZE};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Durable storage of opaque, immutable, variable-length records.
///
/// Implementations must be safe for concurrent use: appends from one thread
/// and reads from others. A record id is only returned once the record can
/// be read back through `read` by any thread.
pub trait AppendOnlyLog: Send + Sync {
    /// Append a record of exactly `size` bytes, filled in place by `writer`.
    fn append<F>(&self, size: usize, writer: F) -> Result<u64>
    where
        F: FnOnce(&mut [u8]) -> Result<()>;

    /// Hand the bytes of record `id` to `reader` and return its result.
    fn read<R, F>(&self, id: u64, reader: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>;

    /// Visit records in append order, starting at the first record at or
    /// after `from`. Stops early when `visitor` returns `false`.
    fn scan_from<F>(&self, from: u64, visitor: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<bool>;

    /// Bytes occupied by the log, including framing.
    fn len_bytes(&self) -> u64;

    /// Number of records appended over the lifetime of the log.
    fn record_count(&self) -> u64;

    /// Persist everything appended so far.
    fn flush(&self) -> Result<()>;

    /// Release the underlying resources. Idempotent.
    fn close(&self) -> Result<()>;

    /// Close and delete all persisted data.
    fn close_and_clean(&self) -> Result<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// [`AppendOnlyLog`] stored in a single file.
pub struct FileLog {
    path: PathBuf,
    writer: Mutex<Option<LogWriter>>,
    reader: Mutex<Option<LogReader>>,
    /// End of the last fully written frame; reads never go past it
    published: AtomicU64,
    records: AtomicU64,
    sync_on_write: bool,
    closed: AtomicBool,
}

impl FileLog {
    /// Open or create a log file.
    ///
    /// An existing file is scanned; frames after the first torn or corrupt
    /// one are cut off so that appends continue from a valid boundary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let existing = path.exists() && std::fs::metadata(&path)?.len() > 0;
        let records = if existing { Self::recover(&path)? } else { 0 };

        let writer = LogWriter::new(&path)?;
        let reader = LogReader::new(&path)?;
        let published = writer.file_size();

        log::info!("Opened log {:?}: {} records, {} bytes", path, records, published);

        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            published: AtomicU64::new(published),
            records: AtomicU64::new(records),
            sync_on_write: false,
            closed: AtomicBool::new(false),
        })
    }

    /// fsync after every append.
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan an existing file, truncate a damaged tail, return the record count.
    fn recover(path: &Path) -> Result<u64> {
        let mut reader = LogReader::new(path)?;
        let mut records = 0u64;

        loop {
            match reader.read_next() {
                Ok(Some(_)) => records += 1,
                Ok(None) => break,
                Err(Error::Corruption(msg)) => {
                    log::warn!("Log corruption at position {}: {}", reader.position(), msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let valid_end = reader.position();
        let file_len = std::fs::metadata(path)?.len();
        if valid_end < file_len {
            log::warn!(
                "Truncating log {:?} from {} to {} bytes ({} bytes of damaged tail)",
                path,
                file_len,
                valid_end,
                file_len - valid_end
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        Ok(records)
    }

    fn closed_error(&self) -> Error {
        Error::closed(format!("log {:?}", self.path))
    }
}

impl AppendOnlyLog for FileLog {
    fn append<F>(&self, size: usize, writer: F) -> Result<u64>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let frame = build_frame(size, writer)?;

        let mut guard = self.writer.lock();
        let log_writer = guard.as_mut().ok_or_else(|| self.closed_error())?;
        let id = log_writer.append(&frame)?;
        if self.sync_on_write {
            log_writer.sync()?;
        }

        self.records.fetch_add(1, Ordering::Relaxed);
        self.published.store(log_writer.file_size(), Ordering::Release);
        Ok(id)
    }

    fn read<R, F>(&self, id: u64, reader: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let limit = self.published.load(Ordering::Acquire);
        let payload = {
            let mut guard = self.reader.lock();
            let log_reader = guard.as_mut().ok_or_else(|| self.closed_error())?;
            log_reader.read_at(id, limit)?
        };
        reader(&payload)
    }

    fn scan_from<F>(&self, from: u64, mut visitor: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<bool>,
    {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let end = self.published.load(Ordering::Acquire);
        let mut reader = LogReader::new(&self.path)?;
        reader.seek(from)?;

        while reader.position() < end {
            match reader.read_next()? {
                Some((id, payload)) => {
                    if !visitor(id, &payload)? {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    fn len_bytes(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn record_count(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    fn flush(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        let log_writer = guard.as_mut().ok_or_else(|| self.closed_error())?;
        log_writer.sync()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reader.lock().take();
        let writer = self.writer.lock().take();
        match writer {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }

    fn close_and_clean(&self) -> Result<()> {
        self.close()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for FileLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLog")
            .field("path", &self.path)
            .field("len_bytes", &self.len_bytes())
            .field("records", &self.record_count())
            .finish()
    }
}

/// Offset of the first record in any [`FileLog`]
pub const FIRST_RECORD_ID: u64 = FILE_HEADER_SIZE as u64;
