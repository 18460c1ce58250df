use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::trace;

use super::HardState;
use super::LedgerStore;
use crate::Entry;
use crate::Index;
use crate::Result;
use crate::StorageError;
use crate::Term;
use crate::NO_INDEX;
use crate::NO_TERM;

/// Volatile store for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: RwLock<BTreeMap<Index, Entry>>,
    hard_state: Mutex<Option<HardState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(
        &self,
        entry: Entry,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        let ledger_end = entries.keys().next_back().copied().unwrap_or(NO_INDEX);
        if entry.index != ledger_end + 1 {
            return Err(StorageError::NonContiguousAppend {
                index: entry.index,
                ledger_end,
            }
            .into());
        }
        trace!("memory append index={} term={}", entry.index, entry.term);
        entries.insert(entry.index, entry);
        Ok(())
    }

    fn get(
        &self,
        index: Index,
    ) -> Result<Option<Entry>> {
        Ok(self.entries.read().get(&index).cloned())
    }

    async fn truncate_from(
        &self,
        index: Index,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        entries.split_off(&index);
        Ok(())
    }

    fn ledger_end(&self) -> (Index, Term) {
        self.entries
            .read()
            .values()
            .next_back()
            .map(|e| (e.index, e.term))
            .unwrap_or((NO_INDEX, NO_TERM))
    }

    fn load_hard_state(&self) -> Result<Option<HardState>> {
        Ok(self.hard_state.lock().clone())
    }

    fn save_hard_state(
        &self,
        state: &HardState,
    ) -> Result<()> {
        *self.hard_state.lock() = Some(state.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
