//! Durable hash-indexed map.
//!
//! [`DurableMap`] ties an [`AppendOnlyLog`] and a [`MultiIdIndex`] together
//! into map semantics. Every write appends a record to the log and redirects
//! the index at it; nothing already written is ever modified. The index only
//! knows candidate record ids per hash, so reads resolve the actual key by
//! reading candidates back from the log and comparing keys.
//!
//! ## Concurrency
//!
//! Writers serialize on a lock owned by the map, which makes the
//! lookup-append-rebind sequence atomic with respect to other writers. The
//! log and index are only called through operations that take their own
//! short internal locks, never the map's. Readers take no map lock: they see
//! the state before or after a concurrent write, never a mix.

pub mod compaction;
pub mod record;
mod recovery;

pub use compaction::CompactionScore;
pub use record::{RecordView, RecordWriter};

use crate::appendlog::{AppendOnlyLog, FileLog};
use crate::config::{Options, TombstonePolicy};
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::index::{FileIndex, MultiIdIndex, NO_VALUE};
use crate::manifest::{self, Manifest};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Index hash used for keys whose own hash collides with [`NO_VALUE`]
const REMAPPED_HASH: u32 = u32::MAX;

/// Location of a map opened from a directory
#[derive(Debug, Clone)]
struct MapHome {
    dir: PathBuf,
    generation: u64,
}

/// Record resolved for a key
struct Found<V> {
    stored_id: u32,
    value: Option<V>,
}

/// Durable key-value map over an append-only log and a hash index.
///
/// # Thread Safety
///
/// `DurableMap` is `Send + Sync` and is meant to be shared through `Arc`.
pub struct DurableMap<K, V, L = FileLog, I = FileIndex>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    log: L,
    index: I,
    key_desc: Arc<dyn Descriptor<K>>,
    value_desc: Arc<dyn Descriptor<V>>,
    options: Options,
    /// Serializes put/remove/force/compaction
    write_lock: Mutex<()>,
    closed: AtomicBool,
    home: Option<MapHome>,
}

impl<K, V> DurableMap<K, V, FileLog, FileIndex> {
    /// Opens the map stored in directory `dir`.
    ///
    /// The directory holds a manifest naming the live generation, whose log
    /// and index snapshot live in `gen-<n>/`. Generation directories left
    /// behind by an uncommitted compaction are removed.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use hashlog::{DurableMap, Options, StringDescriptor};
    ///
    /// # fn main() -> Result<(), hashlog::Error> {
    /// let map = DurableMap::open("./my_map", StringDescriptor, StringDescriptor, Options::default())?;
    /// map.put(&"key".to_string(), &"value".to_string())?;
    /// assert_eq!(map.get(&"key".to_string())?, Some("value".to_string()));
    /// map.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P, KD, VD>(dir: P, key_desc: KD, value_desc: VD, options: Options) -> Result<Self>
    where
        P: AsRef<Path>,
        KD: Descriptor<K> + 'static,
        VD: Descriptor<V> + 'static,
    {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "map directory {:?} does not exist",
                    dir
                )));
            }
            fs::create_dir_all(&dir)?;
        }

        let manifest = match Manifest::load(&dir)? {
            Some(manifest) => manifest,
            None => {
                if !options.create_if_missing {
                    return Err(Error::invalid_argument(format!("{:?} holds no map", dir)));
                }
                let manifest = Manifest::new(0);
                fs::create_dir_all(manifest::generation_dir(&dir, manifest.generation))?;
                manifest.store(&dir)?;
                manifest
            }
        };

        for generation in manifest::list_generations(&dir)? {
            if generation != manifest.generation {
                let stale = manifest::generation_dir(&dir, generation);
                log::info!("Removing stale generation {:?}", stale);
                fs::remove_dir_all(&stale)?;
            }
        }

        log::info!("Opening map {:?} at generation {}", dir, manifest.generation);
        Self::open_generation(
            &dir,
            manifest.generation,
            Arc::new(key_desc),
            Arc::new(value_desc),
            options,
        )
    }

    fn open_generation(
        dir: &Path,
        generation: u64,
        key_desc: Arc<dyn Descriptor<K>>,
        value_desc: Arc<dyn Descriptor<V>>,
        options: Options,
    ) -> Result<Self> {
        let gen_dir = manifest::generation_dir(dir, generation);
        fs::create_dir_all(&gen_dir)?;

        let log = FileLog::open(gen_dir.join(&options.log_file_name))?
            .sync_on_write(options.sync_on_write);
        let index = FileIndex::open(gen_dir.join(&options.index_file_name))?;

        let mut map = Self::from_shared_parts(log, index, key_desc, value_desc, options)?;
        map.home = Some(MapHome { dir: dir.to_path_buf(), generation });
        Ok(map)
    }
}

impl<K, V, L, I> DurableMap<K, V, L, I>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    /// Builds a map over an already opened log and index.
    ///
    /// Records the index has not caught up with (past its watermark) are
    /// replayed into it before the map is returned.
    pub fn with_parts<KD, VD>(
        log: L,
        index: I,
        key_desc: KD,
        value_desc: VD,
        options: Options,
    ) -> Result<Self>
    where
        KD: Descriptor<K> + 'static,
        VD: Descriptor<V> + 'static,
    {
        Self::from_shared_parts(log, index, Arc::new(key_desc), Arc::new(value_desc), options)
    }

    fn from_shared_parts(
        log: L,
        index: I,
        key_desc: Arc<dyn Descriptor<K>>,
        value_desc: Arc<dyn Descriptor<V>>,
        options: Options,
    ) -> Result<Self> {
        options.validate()?;
        let map = Self {
            log,
            index,
            key_desc,
            value_desc,
            options,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            home: None,
        };
        map.recover_index()?;
        Ok(map)
    }

    /// Options the map was opened with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Generation of the map directory this map lives in, if it was opened
    /// from one.
    pub fn generation(&self) -> Option<u64> {
        self.home.as_ref().map(|home| home.generation)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("map"));
        }
        Ok(())
    }

    /// Index hash of `key`, steered clear of the reserved sentinel
    fn index_hash(&self, key: &K) -> u32 {
        let hash = self.key_desc.hash_code(key) as u32;
        if hash == NO_VALUE {
            REMAPPED_HASH
        } else {
            hash
        }
    }

    /// Scan the candidates for `hash` and return the record holding `key`.
    ///
    /// Tombstone records match too; their value comes back as `None`.
    fn find(&self, hash: u32, key: &K) -> Result<Option<Found<V>>> {
        let mut matched_value = None;
        let stored_id = self.index.lookup(hash, |candidate| {
            self.log.read(u64::from(candidate), |record| {
                let view = RecordView::parse(record)?;
                let candidate_key = view.decode_key(self.key_desc.as_ref())?;
                if !self.key_desc.is_equal(&candidate_key, key) {
                    return Ok(false);
                }
                matched_value = Some(view.decode_value(self.value_desc.as_ref())?);
                Ok(true)
            })
        })?;

        if stored_id == NO_VALUE {
            return Ok(None);
        }
        let value = matched_value.ok_or_else(|| {
            Error::internal(format!("index accepted record {} without a key match", stored_id))
        })?;
        Ok(Some(Found { stored_id, value }))
    }

    /// Returns the value mapped to `key`, if any.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.check_open()?;
        let hash = self.index_hash(key);
        Ok(self.find(hash, key)?.and_then(|found| found.value))
    }

    /// Returns true if `key` currently maps to a value.
    ///
    /// A reachable tombstone counts as no mapping.
    pub fn contains_mapping(&self, key: &K) -> Result<bool> {
        self.check_open()?;
        let hash = self.index_hash(key);
        Ok(self.find(hash, key)?.is_some_and(|found| found.value.is_some()))
    }

    /// Maps `key` to `value`.
    ///
    /// Fails with [`Error::InvalidArgument`] if the key encodes to zero
    /// bytes: a record cannot mark such a key as removed.
    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        self.update(key, Some(value))
    }

    /// Removes the mapping for `key`, recording a tombstone.
    pub fn remove(&self, key: &K) -> Result<()> {
        self.update(key, None)
    }

    /// Maps `key` to `value`, or removes it when `value` is `None`.
    ///
    /// Writing the value a key already has is a no-op: nothing is appended
    /// and the index is left alone. Keys that encode to zero bytes are
    /// rejected with [`Error::InvalidArgument`].
    pub fn update(&self, key: &K, value: Option<&V>) -> Result<()> {
        self.check_open()?;
        let writer =
            RecordWriter::new(self.key_desc.as_ref(), self.value_desc.as_ref(), key, value)?;
        let hash = self.index_hash(key);

        let _guard = self.write_lock.lock();
        self.check_open()?;

        let found = self.find(hash, key)?;
        match &found {
            Some(current) if self.same_value(current.value.as_ref(), value) => {
                log::debug!("Skipping write of unchanged value for record {}", current.stored_id);
                return Ok(());
            }
            None if writer.is_tombstone()
                && self.options.tombstone_policy == TombstonePolicy::SkipIfAbsent =>
            {
                log::debug!("Skipping tombstone for a key with no mapping");
                return Ok(());
            }
            _ => {}
        }

        let id = self.log.append(writer.record_size(), |buf| writer.write(buf))?;
        let stored_id = to_stored_id(id)?;
        self.rebind(hash, found.map(|f| f.stored_id), stored_id, value.is_some())
    }

    fn same_value(&self, current: Option<&V>, new: Option<&V>) -> bool {
        match (current, new) {
            (None, None) => true,
            (Some(a), Some(b)) => self.value_desc.is_equal(a, b),
            _ => false,
        }
    }

    /// Point the index at a freshly appended record.
    fn rebind(
        &self,
        hash: u32,
        previous: Option<u32>,
        stored_id: u32,
        present: bool,
    ) -> Result<()> {
        match (previous, present) {
            (Some(old), true) => {
                if !self.index.replace(hash, old, stored_id)? {
                    return Err(Error::internal(format!(
                        "binding ({}, {}) vanished during replace",
                        hash, old
                    )));
                }
            }
            (Some(old), false) => {
                if !self.index.remove(hash, old)? {
                    return Err(Error::internal(format!(
                        "binding ({}, {}) vanished during remove",
                        hash, old
                    )));
                }
            }
            (None, true) => self.index.put(hash, stored_id)?,
            (None, false) => {}
        }
        Ok(())
    }

    /// Number of live keys.
    pub fn size(&self) -> usize {
        self.index.size()
    }

    /// Returns true if the map holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Visits every live key; stops when `visitor` returns false.
    ///
    /// Returns false if the walk was stopped early. Fails with
    /// [`Error::Unsupported`] when the index cannot enumerate its bindings.
    pub fn process_keys<F>(&self, mut visitor: F) -> Result<bool>
    where
        F: FnMut(&K) -> Result<bool>,
    {
        self.check_open()?;
        let mut completed = true;
        self.for_each_live_record(|view| {
            let key = view.decode_key(self.key_desc.as_ref())?;
            let keep_going = visitor(&key)?;
            completed = keep_going;
            Ok(keep_going)
        })?;
        Ok(completed)
    }

    /// Snapshot of all live entries, in index order.
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        self.check_open()?;
        let mut entries = Vec::with_capacity(self.size());
        self.for_each_live_record(|view| {
            let key = view.decode_key(self.key_desc.as_ref())?;
            if let Some(value) = view.decode_value(self.value_desc.as_ref())? {
                entries.push((key, value));
            }
            Ok(true)
        })?;
        Ok(entries)
    }

    /// Walk every record the index points at, skipping tombstones.
    fn for_each_live_record<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(RecordView<'_>) -> Result<bool>,
    {
        self.index.for_each(|_hash, stored_id| {
            self.log.read(u64::from(stored_id), |record| {
                let view = RecordView::parse(record)?;
                if view.is_tombstone() {
                    return Ok(true);
                }
                visitor(view)
            })
        })
    }

    /// Records ever appended to the log, superseded ones included.
    pub fn log_record_count(&self) -> u64 {
        self.log.record_count()
    }

    /// Bytes occupied by the log.
    pub fn log_len_bytes(&self) -> u64 {
        self.log.len_bytes()
    }

    /// Persists the log, then checkpoints the index at the log's length.
    ///
    /// Does not return until both are durable.
    pub fn force(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock();
        self.log.flush()?;
        self.index.set_watermark(self.log.len_bytes());
        self.index.flush()
    }

    /// Always false: every write goes straight to the log.
    pub fn is_dirty(&self) -> bool {
        false
    }

    /// Returns true once `close` or `close_and_clean` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the log and the index.
    ///
    /// Both are closed even if one fails; two failures are reported together
    /// as [`Error::Multiple`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let covered = self.log.len_bytes();
        let result = Error::run_both(
            "closing map",
            || self.log.close(),
            || {
                self.index.set_watermark(covered);
                Error::run_both("closing index", || self.index.flush(), || self.index.close())
            },
        );
        log::info!("Map closed");
        result
    }

    /// Closes the map and deletes everything it persisted.
    pub fn close_and_clean(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.closed.store(true, Ordering::Release);

        Error::run_both(
            "cleaning map",
            || self.log.close_and_clean(),
            || self.index.close_and_clean(),
        )?;

        if let Some(home) = &self.home {
            let gen_dir = manifest::generation_dir(&home.dir, home.generation);
            match fs::remove_dir_all(&gen_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
            if Manifest::load(&home.dir)?.is_some_and(|m| m.generation == home.generation) {
                fs::remove_file(home.dir.join(manifest::MANIFEST_FILE))?;
            }
            log::info!("Removed map generation {:?}", gen_dir);
        }
        Ok(())
    }
}

/// Narrow a log record id to the index's 32-bit id space.
fn to_stored_id(id: u64) -> Result<u32> {
    let stored = u32::try_from(id)
        .map_err(|_| {
            Error::invalid_argument(format!("record id {} exceeds the 32-bit index range", id))
        })?;
    if stored == NO_VALUE {
        return Err(Error::invalid_argument("log issued the reserved record id 0"));
    }
    Ok(stored)
}

impl<K, V, L, I> Drop for DurableMap<K, V, L, I>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                log::warn!("Error closing map during drop: {}", e);
            }
        }
    }
}

impl<K, V, L, I> std::fmt::Debug for DurableMap<K, V, L, I>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableMap")
            .field("size", &self.size())
            .field("log_records", &self.log_record_count())
            .field("log_bytes", &self.log_len_bytes())
            .field("home", &self.home)
            .field("closed", &self.is_closed())
            .finish()
    }
}
