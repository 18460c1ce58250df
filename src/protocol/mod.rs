//! Wire-level vocabulary shared by every node: identifiers, ledger entries,
//! the request/response pairs and their status codes.

mod code;
mod message;

pub use code::*;
pub use message::*;

use serde::Deserialize;
use serde::Serialize;

pub type NodeId = String;
pub type Term = i64;
pub type Index = i64;

/// Marks an empty ledger for both index and term.
pub const NO_INDEX: Index = -1;
pub const NO_TERM: Term = -1;

/// A single ledger entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub index: Index,
    pub term: Term,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn new(
        index: Index,
        term: Term,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            index,
            term,
            payload,
        }
    }
}
