//! Durable ledger storage.
//!
//! The consensus core only decides what gets appended and when it counts as
//! committed; the byte layout belongs to the store.

mod memory;
mod sled_store;
pub use memory::*;
pub use sled_store::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::Entry;
use crate::Index;
use crate::NodeId;
use crate::Result;
use crate::Term;

/// Term and vote, persisted so a restarted node never votes twice in a term.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Appends `entry`, whose index must be `ledger_end().0 + 1`.
    ///
    /// The entry is durable once this returns `Ok`.
    async fn append(
        &self,
        entry: Entry,
    ) -> Result<()>;

    fn get(
        &self,
        index: Index,
    ) -> Result<Option<Entry>>;

    /// Removes every entry at or after `index`.
    async fn truncate_from(
        &self,
        index: Index,
    ) -> Result<()>;

    /// `(index, term)` of the last entry, `(-1, -1)` when empty.
    fn ledger_end(&self) -> (Index, Term);

    fn load_hard_state(&self) -> Result<Option<HardState>>;

    fn save_hard_state(
        &self,
        state: &HardState,
    ) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Term of the entry at `index`, `-1` for index `-1`.
pub(crate) fn term_at(
    store: &dyn LedgerStore,
    index: Index,
) -> Result<Term> {
    if index < 0 {
        return Ok(crate::NO_TERM);
    }
    store
        .get(index)?
        .map(|e| e.term)
        .ok_or_else(|| crate::StorageError::EntryNotFound(index).into())
}
