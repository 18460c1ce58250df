use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use super::Entry;
use super::Index;
use super::NodeId;
use super::RequestCode;
use super::ResponseCode;
use super::Term;
use super::VoteResult;
use super::NO_INDEX;
use super::NO_TERM;

/// A request body. `remote_id` names the receiver, `local_id` the sender.
pub trait LedgerRequest: Serialize + DeserializeOwned + Send + Sync + 'static {
    const CODE: RequestCode;
    type Response: LedgerResponse;

    fn group(&self) -> &str;
    fn remote_id(&self) -> &str;
}

pub trait LedgerResponse: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// An empty response carrying only a status code.
    fn with_code(code: ResponseCode) -> Self;

    fn code(&self) -> ResponseCode;
}

macro_rules! impl_ledger_request {
    ($req:ty, $resp:ty, $code:expr) => {
        impl LedgerRequest for $req {
            const CODE: RequestCode = $code;
            type Response = $resp;

            fn group(&self) -> &str {
                &self.group
            }

            fn remote_id(&self) -> &str {
                &self.remote_id
            }
        }

        impl LedgerResponse for $resp {
            fn with_code(code: ResponseCode) -> Self {
                Self {
                    code,
                    ..Default::default()
                }
            }

            fn code(&self) -> ResponseCode {
                self.code
            }
        }
    };
}

// ---------------------------------------------------------------------------
// HeartBeat

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartBeatRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub term: Term,
    pub leader_id: NodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartBeatResponse {
    pub code: ResponseCode,
    pub term: Term,
}

impl_ledger_request!(HeartBeatRequest, HeartBeatResponse, RequestCode::HeartBeat);

// ---------------------------------------------------------------------------
// Vote

/// `leader_id` is the candidate asking to become leader.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub term: Term,
    pub leader_id: NodeId,
    pub ledger_end_index: Index,
    pub ledger_end_term: Term,
}

impl Default for VoteRequest {
    fn default() -> Self {
        Self {
            group: String::new(),
            remote_id: NodeId::new(),
            local_id: NodeId::new(),
            term: 0,
            leader_id: NodeId::new(),
            ledger_end_index: NO_INDEX,
            ledger_end_term: NO_TERM,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteResponse {
    pub code: ResponseCode,
    pub term: Term,
    pub result: VoteResult,
}

impl_ledger_request!(VoteRequest, VoteResponse, RequestCode::Vote);

// ---------------------------------------------------------------------------
// Append

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendEntryRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppendEntryResponse {
    pub code: ResponseCode,
    pub index: Index,
    pub term: Term,
    /// Hint for the caller when this node is not the leader.
    pub leader_id: Option<NodeId>,
}

impl Default for AppendEntryResponse {
    fn default() -> Self {
        Self {
            code: ResponseCode::Unknown,
            index: NO_INDEX,
            term: NO_TERM,
            leader_id: None,
        }
    }
}

impl_ledger_request!(AppendEntryRequest, AppendEntryResponse, RequestCode::Append);

// ---------------------------------------------------------------------------
// Get

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetEntriesRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub begin_index: Index,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GetEntriesResponse {
    pub code: ResponseCode,
    pub entries: Vec<Entry>,
}

impl_ledger_request!(GetEntriesRequest, GetEntriesResponse, RequestCode::Get);

// ---------------------------------------------------------------------------
// Metadata

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataResponse {
    pub code: ResponseCode,
    pub leader_id: Option<NodeId>,
}

impl_ledger_request!(MetadataRequest, MetadataResponse, RequestCode::Metadata);

// ---------------------------------------------------------------------------
// Pull

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PullEntriesRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub from_index: Index,
    /// Requester's batch limit; the server may send fewer.
    pub max_entries: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PullEntriesResponse {
    pub code: ResponseCode,
    pub term: Term,
    /// Term of the entry just before `from_index`, or -1.
    pub prev_term: Term,
    pub entries: Vec<Entry>,
}

impl Default for PullEntriesResponse {
    fn default() -> Self {
        Self {
            code: ResponseCode::Unknown,
            term: 0,
            prev_term: NO_TERM,
            entries: Vec::new(),
        }
    }
}

impl_ledger_request!(PullEntriesRequest, PullEntriesResponse, RequestCode::Pull);

// ---------------------------------------------------------------------------
// Push

/// Leader-initiated delivery of one entry.
///
/// A push without an entry only carries the leader's commit index and probes
/// the follower's ledger end.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PushEntryRequest {
    pub group: String,
    pub remote_id: NodeId,
    pub local_id: NodeId,
    pub term: Term,
    pub leader_id: NodeId,
    /// `entry.index - 1`, or the index being probed when `entry` is empty
    pub prev_index: Index,
    pub prev_term: Term,
    pub entry: Option<Entry>,
    pub committed_index: Index,
}

impl Default for PushEntryRequest {
    fn default() -> Self {
        Self {
            group: String::new(),
            remote_id: NodeId::new(),
            local_id: NodeId::new(),
            term: 0,
            leader_id: NodeId::new(),
            prev_index: NO_INDEX,
            prev_term: NO_TERM,
            entry: None,
            committed_index: NO_INDEX,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PushEntryResponse {
    pub code: ResponseCode,
    pub term: Term,
    /// Highest contiguous index the follower holds.
    pub acknowledged_index: Index,
}

impl Default for PushEntryResponse {
    fn default() -> Self {
        Self {
            code: ResponseCode::Unknown,
            term: 0,
            acknowledged_index: NO_INDEX,
        }
    }
}

impl_ledger_request!(PushEntryRequest, PushEntryResponse, RequestCode::Push);
