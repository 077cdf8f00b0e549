//! Hash-to-multi-id index.
//!
//! A durable multimap from a 32-bit hash to a set of 32-bit record ids. A
//! hash does not identify a key: every id in a bucket is only a *candidate*,
//! and callers resolve the real match by scanning the bucket with an
//! acceptance predicate.
//!
//! ## Concurrency
//!
//! Buckets live in a lock-free skiplist and each bucket sits behind its own
//! small lock. Mutations are serialized by an index-level mutex. `lookup`
//! and `for_each` copy a bucket out before running caller code, so no index
//! lock is ever held while the caller reads the log.

pub mod snapshot;

pub use snapshot::SnapshotBody;

use crate::error::{Error, Result};
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Reserved "no value" sentinel: never a valid hash or id.
pub const NO_VALUE: u32 = 0;

/// Durable multimap from hash to candidate ids.
pub trait MultiIdIndex: Send + Sync {
    /// Visit the ids bound to `hash` in a deterministic order and return the
    /// first one `accept` takes, or [`NO_VALUE`].
    fn lookup<F>(&self, hash: u32, accept: F) -> Result<u32>
    where
        F: FnMut(u32) -> Result<bool>;

    /// Bind `id` to `hash`. Binding an existing pair again is a no-op.
    fn put(&self, hash: u32, id: u32) -> Result<()>;

    /// Swap `old_id` for `new_id` under `hash`. Returns false if `old_id`
    /// was not bound to `hash`.
    fn replace(&self, hash: u32, old_id: u32, new_id: u32) -> Result<bool>;

    /// Unbind `id` from `hash`. Returns false if it was not bound.
    fn remove(&self, hash: u32, id: u32) -> Result<bool>;

    /// Total number of bindings.
    fn size(&self) -> usize;

    /// Whether there are no bindings at all.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Visit every (hash, id) binding; stops early when `visitor` returns false.
    fn for_each<F>(&self, _visitor: F) -> Result<()>
    where
        F: FnMut(u32, u32) -> Result<bool>,
    {
        Err(Error::unsupported("this index cannot enumerate its bindings"))
    }

    /// Drop every binding.
    fn clear(&self) -> Result<()>;

    /// Log length the persisted bindings are known to cover. Records past it
    /// must be replayed after a restart.
    fn watermark(&self) -> u64 {
        0
    }

    /// Record the log length the current bindings cover; persisted by `flush`.
    fn set_watermark(&self, _watermark: u64) {}

    /// Persist the current bindings.
    fn flush(&self) -> Result<()>;

    /// Release the underlying resources. Idempotent.
    fn close(&self) -> Result<()>;

    /// Close and delete all persisted data.
    fn close_and_clean(&self) -> Result<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// [`MultiIdIndex`] held in memory and persisted as a snapshot file.
pub struct FileIndex {
    path: PathBuf,
    buckets: SkipMap<u32, RwLock<Vec<u32>>>,
    /// Serializes mutations
    write_lock: Mutex<()>,
    size: AtomicUsize,
    watermark: AtomicU64,
    closed: AtomicBool,
}

impl FileIndex {
    /// Open the index persisted at `path`, or start an empty one.
    ///
    /// A snapshot that fails validation is discarded with a warning; its
    /// watermark resets to 0 so the owner rebuilds the bindings from the log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let body = match SnapshotBody::read_from(&path) {
            Ok(Some(body)) => body,
            Ok(None) => SnapshotBody::default(),
            Err(Error::Corruption(msg)) | Err(Error::Serialization(msg)) => {
                log::warn!("Discarding unreadable index snapshot {:?}: {}", path, msg);
                SnapshotBody::default()
            }
            Err(e) => return Err(e),
        };

        let index = Self {
            path,
            buckets: SkipMap::new(),
            write_lock: Mutex::new(()),
            size: AtomicUsize::new(0),
            watermark: AtomicU64::new(body.watermark),
            closed: AtomicBool::new(false),
        };
        for (hash, id) in body.bindings {
            index.put(hash, id)?;
        }

        log::info!(
            "Opened index {:?}: {} bindings, watermark {}",
            index.path,
            index.size(),
            body.watermark
        );
        Ok(index)
    }

    /// Get the path to the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed(format!("index {:?}", self.path)));
        }
        Ok(())
    }

    fn check_binding(hash: u32, id: u32) -> Result<()> {
        if hash == NO_VALUE || id == NO_VALUE {
            return Err(Error::invalid_argument(format!(
                "index binding ({}, {}) uses the reserved value {}",
                hash, id, NO_VALUE
            )));
        }
        Ok(())
    }

    /// Copy of the ids bound to `hash`
    fn candidates(&self, hash: u32) -> Vec<u32> {
        match self.buckets.get(&hash) {
            Some(entry) => entry.value().read().clone(),
            None => Vec::new(),
        }
    }

    fn snapshot(&self) -> SnapshotBody {
        let mut bindings = Vec::with_capacity(self.size());
        for entry in self.buckets.iter() {
            let hash = *entry.key();
            bindings.extend(entry.value().read().iter().map(|&id| (hash, id)));
        }
        SnapshotBody { watermark: self.watermark.load(Ordering::Acquire), bindings }
    }
}

impl MultiIdIndex for FileIndex {
    fn lookup<F>(&self, hash: u32, mut accept: F) -> Result<u32>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        self.check_open()?;
        for id in self.candidates(hash) {
            if accept(id)? {
                return Ok(id);
            }
        }
        Ok(NO_VALUE)
    }

    fn put(&self, hash: u32, id: u32) -> Result<()> {
        self.check_open()?;
        Self::check_binding(hash, id)?;

        let _guard = self.write_lock.lock();
        let entry = self.buckets.get_or_insert_with(hash, || RwLock::new(Vec::new()));
        let mut ids = entry.value().write();
        if !ids.contains(&id) {
            ids.push(id);
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn replace(&self, hash: u32, old_id: u32, new_id: u32) -> Result<bool> {
        self.check_open()?;
        Self::check_binding(hash, new_id)?;

        let _guard = self.write_lock.lock();
        let Some(entry) = self.buckets.get(&hash) else {
            return Ok(false);
        };
        let mut ids = entry.value().write();
        let Some(pos) = ids.iter().position(|&id| id == old_id) else {
            return Ok(false);
        };
        if ids.contains(&new_id) {
            ids.remove(pos);
            self.size.fetch_sub(1, Ordering::AcqRel);
        } else {
            ids[pos] = new_id;
        }
        Ok(true)
    }

    fn remove(&self, hash: u32, id: u32) -> Result<bool> {
        self.check_open()?;

        let _guard = self.write_lock.lock();
        let Some(entry) = self.buckets.get(&hash) else {
            return Ok(false);
        };
        let now_empty = {
            let mut ids = entry.value().write();
            let Some(pos) = ids.iter().position(|&candidate| candidate == id) else {
                return Ok(false);
            };
            ids.remove(pos);
            ids.is_empty()
        };
        self.size.fetch_sub(1, Ordering::AcqRel);
        if now_empty {
            entry.remove();
        }
        Ok(true)
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn for_each<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(u32, u32) -> Result<bool>,
    {
        self.check_open()?;
        for entry in self.buckets.iter() {
            let hash = *entry.key();
            let ids = entry.value().read().clone();
            for id in ids {
                if !visitor(hash, id)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock();
        self.buckets.clear();
        self.size.store(0, Ordering::Release);
        self.watermark.store(0, Ordering::Release);
        Ok(())
    }

    fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    fn set_watermark(&self, watermark: u64) {
        self.watermark.store(watermark, Ordering::Release);
    }

    fn flush(&self) -> Result<()> {
        self.check_open()?;
        let body = {
            let _guard = self.write_lock.lock();
            self.snapshot()
        };
        body.write_to(&self.path)?;
        log::debug!(
            "Index snapshot written: {} bindings, watermark {}",
            body.bindings.len(),
            body.watermark
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        self.buckets.clear();
        Ok(())
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

impl std::fmt::Debug for FileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndex")
            .field("path", &self.path)
            .field("size", &self.size())
            .field("watermark", &self.watermark())
            .finish()
    }
}
