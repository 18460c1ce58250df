//! Ledger Error Hierarchy
//!
//! Errors are grouped by the layer that produces them. Protocol rejections
//! (vote results, out-of-order pushes) are never errors: they travel as typed
//! responses. What remains here are infrastructure failures, configuration
//! problems and broken invariants. The latter are fatal and stop the node.

use std::time::Duration;

use config::ConfigError;

use crate::Index;
use crate::NodeId;
use crate::Term;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Election and replication failures
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Unrecoverable failures requiring the node to halt
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Fatal errors halt the node's participation in the group.
    ///
    /// Storage failures are fatal because the node can no longer guarantee
    /// durability of what it acknowledged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal(_)
                | Error::Consensus(ConsensusError::Invariant(_))
                | Error::System(SystemError::Storage(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// MemberState invariant broken
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Role permission conflict error
    #[error("Operation requires {required_role} role but current role is {current_role}")]
    RoleViolation {
        current_role: &'static str,
        required_role: &'static str,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Term regression: current term {current}, requested {requested}")]
    TermRegression { current: Term, requested: Term },

    #[error("Term {term} already voted for {voted_for}, refusing to vote for {candidate}")]
    DoubleVote {
        term: Term,
        voted_for: NodeId,
        candidate: NodeId,
    },

    #[error("Ledger end index {index} and term {term} must both be -1 or both be set")]
    LedgerEndMismatch { index: Index, term: Term },

    #[error("Committed index {committed} exceeds ledger end {ledger_end}")]
    CommittedBeyondLedgerEnd { committed: Index, ledger_end: Index },

    #[error("Attempt to truncate committed entry {index} (committed index {committed})")]
    TruncateCommitted { index: Index, committed: Index },

    #[error("Follower of term {term} must follow a peer other than self, got {leader:?}")]
    InvalidLeader { term: Term, leader: NodeId },

    #[error("Follower term {requested} does not match current term {current}")]
    FollowerTermMismatch { current: Term, requested: Term },
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer communication timeout
    #[error("Call to {node_id} timed out after {duration:?}")]
    Timeout { node_id: NodeId, duration: Duration },

    /// Peer is not in the configured address book
    #[error("Unknown peer {0}")]
    UnknownPeer(NodeId),

    /// Peer cannot be reached
    #[error("Peer {0} unreachable")]
    Unreachable(NodeId),

    /// Connection dropped while a call was pending
    #[error("Connection to {0} closed")]
    ConnectionClosed(String),

    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during ledger operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error(transparent)]
    DbError(#[from] sled::Error),

    #[error("Append at index {index} but ledger end is {ledger_end}")]
    NonContiguousAppend { index: Index, ledger_end: Index },

    #[error("Entry {0} not found")]
    EntryNotFound(Index),

    #[error("Corrupted key {0:?}")]
    CorruptedKey(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Node start failed: {0}")]
    NodeStartFailed(String),
}

// ============== Conversion Implementations ============== //

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::DbError(e)))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::System(SystemError::Serialization(SerializationError::Bincode(e)))
    }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self {
        Error::Consensus(ConsensusError::Invariant(e))
    }
}

