//! Index recovery.
//!
//! The index is only checkpointed by `force` and `close`, so after a crash
//! its snapshot may lag behind the log. The snapshot's watermark says how much
//! of the log it covers; every record past it is replayed in append order
//! through the same rebinding rules a live write uses. Replaying a record the
//! index already reflects leaves the final bindings unchanged, so an index
//! without a watermark simply replays the whole log.

use super::{to_stored_id, DurableMap, RecordView};
use crate::appendlog::AppendOnlyLog;
use crate::error::Result;
use crate::index::MultiIdIndex;

impl<K, V, L, I> DurableMap<K, V, L, I>
where
    L: AppendOnlyLog,
    I: MultiIdIndex,
{
    pub(super) fn recover_index(&self) -> Result<()> {
        let log_len = self.log.len_bytes();
        let mut watermark = self.index.watermark();

        if watermark > log_len {
            log::warn!(
                "Index covers {} bytes but the log holds {}; rebuilding the index",
                watermark,
                log_len
            );
            self.index.clear()?;
            watermark = 0;
        }
        if watermark == log_len {
            return Ok(());
        }

        let mut replayed = 0u64;
        self.log.scan_from(watermark, |id, record| {
            self.replay_record(id, record)?;
            replayed += 1;
            Ok(true)
        })?;

        self.index.set_watermark(log_len);
        if replayed == 0 {
            return Ok(());
        }
        self.index.flush()?;
        log::info!(
            "Replayed {} log records from offset {}; index now holds {} bindings",
            replayed,
            watermark,
            self.index.size()
        );
        Ok(())
    }

    fn replay_record(&self, id: u64, record: &[u8]) -> Result<()> {
        let stored_id = to_stored_id(id)?;
        let view = RecordView::parse(record)?;
        let key = view.decode_key(self.key_desc.as_ref())?;
        let hash = self.index_hash(&key);

        let previous = self.find(hash, &key)?.map(|found| found.stored_id);
        if previous == Some(stored_id) {
            log::debug!("Record {} is already indexed", stored_id);
            return Ok(());
        }
        self.rebind(hash, previous, stored_id, !view.is_tombstone())
    }
}
