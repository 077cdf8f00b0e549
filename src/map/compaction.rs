//! Compaction.
//!
//! The log never shrinks: overwritten values and tombstones stay in it until
//! the map is rewritten. Compaction copies every record the index still
//! points at into a fresh log/index pair and returns a new map over it. The
//! source map stays fully usable until the caller switches over.
//!
//! For a map opened from a directory the fresh pair is the next generation:
//!
//! ```rust,no_run
//! use hashlog::{BytesDescriptor, DurableMap, Options, StringDescriptor};
//!
//! # fn main() -> Result<(), hashlog::Error> {
//! let map: DurableMap<String, Vec<u8>> =
//!     DurableMap::open("./my_map", StringDescriptor, BytesDescriptor, Options::default())?;
//! if map.needs_compaction() {
//!     let compacted = map.compact()?;
//!     compacted.commit_compaction()?;
//!     map.close_and_clean()?;
//! }
//! # Ok(())
//! # }
//! ```

use super::{to_stored_id, DurableMap, MapHome, RecordView};
use crate::appendlog::{AppendOnlyLog, FileLog};
use crate::error::{Error, Result};
use crate::index::{FileIndex, MultiIdIndex};
use crate::manifest::{self, Manifest};
use std::fs;

/// Fraction of log records that are still live, in `[0, 1]`.
///
/// Advisory only: it counts records, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CompactionScore(f64);

impl CompactionScore {
    /// Score for `live` reachable records out of `total` appended.
    pub fn new(live: u64, total: u64) -> Self {
        if total == 0 {
            return Self(1.0);
        }
        Self((live as f64 / total as f64).clamp(0.0, 1.0))
    }

    /// The live fraction
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Whether the live fraction has dropped below `threshold`.
    pub fn needs_compaction(&self, threshold: f64) -> bool {
        self.0 < threshold
    }
}

impl<K, V, L, I> DurableMap<K, V, L, I>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    /// Live records over total log records.
    pub fn compaction_score(&self) -> CompactionScore {
        CompactionScore::new(self.index.size() as u64, self.log.record_count())
    }

    /// Whether the score is below the configured threshold.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score().needs_compaction(self.options.compaction_threshold)
    }

    /// Copies the live entries into an empty `log` and `index`.
    ///
    /// Writers are held off for the whole copy, so the result reflects
    /// exactly the state at the moment it finishes. Each live key lands in
    /// the new log once; tombstones and superseded records are left behind.
    pub fn compact_into<L2, I2>(&self, log: L2, index: I2) -> Result<DurableMap<K, V, L2, I2>>
    where
        L2: AppendOnlyLog,
        I2: MultiIdIndex,
    {
        let _guard = self.write_lock.lock();
        self.copy_live_into(log, index)
    }

    /// Body of `compact_into`; the caller holds `write_lock`.
    fn copy_live_into<L2, I2>(&self, log: L2, index: I2) -> Result<DurableMap<K, V, L2, I2>>
    where
        L2: AppendOnlyLog,
        I2: MultiIdIndex,
    {
        self.check_open()?;
        if log.record_count() != 0 || !index.is_empty() {
            return Err(Error::invalid_argument("compaction target must be empty"));
        }

        let target = DurableMap::from_shared_parts(
            log,
            index,
            self.key_desc.clone(),
            self.value_desc.clone(),
            self.options.clone(),
        )?;

        let records_before = self.log.record_count();
        let mut copied = 0u64;
        self.index.for_each(|hash, stored_id| {
            let record = self.log.read(u64::from(stored_id), |record| {
                let view = RecordView::parse(record)?;
                Ok((!view.is_tombstone()).then(|| record.to_vec()))
            })?;
            if let Some(record) = record {
                let id = target.log.append(record.len(), |buf| {
                    buf.copy_from_slice(&record);
                    Ok(())
                })?;
                target.index.put(hash, to_stored_id(id)?)?;
                copied += 1;
            }
            Ok(true)
        })?;

        target.log.flush()?;
        target.index.set_watermark(target.log.len_bytes());
        target.index.flush()?;

        log::info!(
            "Compaction copied {} of {} records ({} -> {} bytes)",
            copied,
            records_before,
            self.log.len_bytes(),
            target.log.len_bytes()
        );
        Ok(target)
    }
}

impl<K, V> DurableMap<K, V, FileLog, FileIndex> {
    /// Writes the live entries into the next generation of the map directory.
    ///
    /// The manifest still names this map's generation afterwards; call
    /// [`commit_compaction`](Self::commit_compaction) on the returned map to
    /// switch over, then `close_and_clean` this one.
    ///
    /// Concurrent calls run one after the other; each rewrites the next
    /// generation from scratch.
    pub fn compact(&self) -> Result<Self> {
        let home = self
            .home
            .as_ref()
            .ok_or_else(|| Error::unsupported("compact() needs a map opened from a directory"))?;
        let next = home.generation + 1;

        let _guard = self.write_lock.lock();
        self.check_open()?;

        let gen_dir = manifest::generation_dir(&home.dir, next);
        if gen_dir.exists() {
            log::warn!("Discarding leftover generation {:?}", gen_dir);
            fs::remove_dir_all(&gen_dir)?;
        }
        fs::create_dir_all(&gen_dir)?;

        let log = FileLog::open(gen_dir.join(&self.options.log_file_name))?
            .sync_on_write(self.options.sync_on_write);
        let index = FileIndex::open(gen_dir.join(&self.options.index_file_name))?;

        let mut target = self.copy_live_into(log, index)?;
        target.home = Some(MapHome { dir: home.dir.clone(), generation: next });
        log::info!("Compacted generation {} into {}", home.generation, next);
        Ok(target)
    }

    /// Makes this map's generation the one the directory opens with.
    pub fn commit_compaction(&self) -> Result<()> {
        self.check_open()?;
        let home = self
            .home
            .as_ref()
            .ok_or_else(|| {
                Error::unsupported("commit_compaction() needs a map opened from a directory")
            })?;
        Manifest::new(home.generation).store(&home.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_of_empty_log() {
        assert_eq!(CompactionScore::new(0, 0).value(), 1.0);
        assert!(!CompactionScore::new(0, 0).needs_compaction(0.5));
    }

    #[test]
    fn test_score_threshold() {
        let score = CompactionScore::new(1, 4);
        assert_eq!(score.value(), 0.25);
        assert!(score.needs_compaction(0.5));
        assert!(!score.needs_compaction(0.25));
        assert!(CompactionScore::new(3, 4) > score);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(CompactionScore::new(10, 4).value(), 1.0);
    }
}
