use std::sync::Arc;

use crate::Entry;
use crate::Index;
use crate::LedgerStore;
use crate::Result;
use crate::StorageError;

/// Lazy walk over `[next, end]` of a ledger store.
///
/// Entries are read one at a time as the cursor advances. [`EntryCursor::seek`]
/// restarts the walk from any index.
pub struct EntryCursor {
    store: Arc<dyn LedgerStore>,
    next: Index,
    end: Index,
}

impl EntryCursor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        from: Index,
        end: Index,
    ) -> Self {
        Self {
            store,
            next: from.max(0),
            end,
        }
    }

    pub fn seek(
        &mut self,
        index: Index,
    ) {
        self.next = index.max(0);
    }

    /// Index of the entry the next call to `next` yields.
    pub fn position(&self) -> Index {
        self.next
    }

    pub fn remaining(&self) -> usize {
        (self.end - self.next + 1).max(0) as usize
    }
}

impl Iterator for EntryCursor {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        match self.store.get(index) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                // a hole ends the walk
                self.next = self.end + 1;
                Some(Err(StorageError::EntryNotFound(index).into()))
            }
            Err(e) => {
                self.next = self.end + 1;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
