use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::Batch;
use sled::Tree;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::HardState;
use super::LedgerStore;
use crate::utils::convert::index_to_key;
use crate::utils::convert::key_to_index;
use crate::Entry;
use crate::Index;
use crate::Result;
use crate::StorageError;
use crate::Term;
use crate::NO_INDEX;
use crate::NO_TERM;

const ENTRY_TREE: &str = "ledger_entries";
const META_TREE: &str = "ledger_meta";
pub const HARD_STATE_KEY: &[u8] = b"hard_state";

/// Sled-backed store: one tree of entries keyed by big-endian index, one
/// tree for the hard state.
pub struct SledLedgerStore {
    db: sled::Db,
    entries: Tree,
    meta: Tree,
    /// Cached `(index, term)` of the last entry
    end: Mutex<(Index, Term)>,
}

impl SledLedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(StorageError::IoError)?;
        let db = sled::Config::default().path(path).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let entries = db.open_tree(ENTRY_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let end = Self::load_end(&entries)?;
        info!("sled ledger opened, ledger end = {:?}", end);
        Ok(Self {
            db,
            entries,
            meta,
            end: Mutex::new(end),
        })
    }

    fn load_end(entries: &Tree) -> Result<(Index, Term)> {
        match entries.last()? {
            Some((key, value)) => {
                let index = key_to_index(&key)?;
                let entry: Entry = bincode::deserialize(&value)?;
                debug_assert_eq!(index, entry.index);
                Ok((entry.index, entry.term))
            }
            None => Ok((NO_INDEX, NO_TERM)),
        }
    }
}

#[async_trait]
impl LedgerStore for SledLedgerStore {
    async fn append(
        &self,
        entry: Entry,
    ) -> Result<()> {
        let ledger_end = self.end.lock().0;
        if entry.index != ledger_end + 1 {
            return Err(StorageError::NonContiguousAppend {
                index: entry.index,
                ledger_end,
            }
            .into());
        }

        trace!("sled append index={} term={}", entry.index, entry.term);
        let value = bincode::serialize(&entry)?;
        self.entries.insert(index_to_key(entry.index), value)?;
        self.entries.flush_async().await?;
        *self.end.lock() = (entry.index, entry.term);
        Ok(())
    }

    fn get(
        &self,
        index: Index,
    ) -> Result<Option<Entry>> {
        if index < 0 {
            return Ok(None);
        }
        match self.entries.get(index_to_key(index))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn truncate_from(
        &self,
        index: Index,
    ) -> Result<()> {
        let mut batch = Batch::default();
        let mut removed = 0usize;
        for item in self.entries.range(index_to_key(index.max(0))..) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.entries.apply_batch(batch)?;
        self.entries.flush_async().await?;

        let end = Self::load_end(&self.entries)?;
        *self.end.lock() = end;
        debug!("truncated {} entries from {}, ledger end = {:?}", removed, index, end);
        Ok(())
    }

    fn ledger_end(&self) -> (Index, Term) {
        *self.end.lock()
    }

    fn load_hard_state(&self) -> Result<Option<HardState>> {
        match self.meta.get(HARD_STATE_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_hard_state(
        &self,
        state: &HardState,
    ) -> Result<()> {
        let value = bincode::serialize(state)?;
        self.meta.insert(HARD_STATE_KEY, value)?;
        self.meta.flush()?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
