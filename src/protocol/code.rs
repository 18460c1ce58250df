use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Identifies which operation a frame carries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    HeartBeat,
    Vote,
    Append,
    Get,
    Metadata,
    Pull,
    Push,
}

impl RequestCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCode::HeartBeat => "heart_beat",
            RequestCode::Vote => "vote",
            RequestCode::Append => "append",
            RequestCode::Get => "get",
            RequestCode::Metadata => "metadata",
            RequestCode::Pull => "pull",
            RequestCode::Push => "push",
        }
    }
}

/// Status carried by every response.
///
/// A transport failure on the calling side is reported as
/// [`ResponseCode::NetworkError`], never as an error value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseCode {
    #[default]
    Unknown,
    Success,
    Unsupported,
    NetworkError,
    UnknownGroup,
    UnknownMember,
    UnexpectedMember,
    NotLeader,
    NotFollower,
    ExpiredTerm,
    InconsistentLeader,
    OutOfOrder,
    InconsistentState,
    WaitQuorumAckTimeout,
    InternalError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Unknown => "UNKNOWN",
            ResponseCode::Success => "SUCCESS",
            ResponseCode::Unsupported => "UNSUPPORTED",
            ResponseCode::NetworkError => "NETWORK_ERROR",
            ResponseCode::UnknownGroup => "UNKNOWN_GROUP",
            ResponseCode::UnknownMember => "UNKNOWN_MEMBER",
            ResponseCode::UnexpectedMember => "UNEXPECTED_MEMBER",
            ResponseCode::NotLeader => "NOT_LEADER",
            ResponseCode::NotFollower => "NOT_FOLLOWER",
            ResponseCode::ExpiredTerm => "EXPIRED_TERM",
            ResponseCode::InconsistentLeader => "INCONSISTENT_LEADER",
            ResponseCode::OutOfOrder => "OUT_OF_ORDER",
            ResponseCode::InconsistentState => "INCONSISTENT_STATE",
            ResponseCode::WaitQuorumAckTimeout => "WAIT_QUORUM_ACK_TIMEOUT",
            ResponseCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a vote request.
///
/// The rejections are evaluated in declaration order; the first one that
/// applies wins. `Unknown` is never produced by a voter: it marks a vote that
/// did not arrive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoteResult {
    #[default]
    Unknown,
    Accept,
    RejectUnknownLeader,
    RejectUnexpectedLeader,
    RejectExpiredVoteTerm,
    RejectAlreadyHasLeader,
    RejectExpiredLegerTerm,
    RejectSmallLegerEndIndex,
    RejectTermSmallThanLeger,
    RejectAlreadyVoted,
}

impl VoteResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteResult::Unknown => "UNKNOWN",
            VoteResult::Accept => "ACCEPT",
            VoteResult::RejectUnknownLeader => "REJECT_UNKNOWN_LEADER",
            VoteResult::RejectUnexpectedLeader => "REJECT_UNEXPECTED_LEADER",
            VoteResult::RejectExpiredVoteTerm => "REJECT_EXPIRED_VOTE_TERM",
            VoteResult::RejectAlreadyHasLeader => "REJECT_ALREADY__HAS_LEADER",
            VoteResult::RejectExpiredLegerTerm => "REJECT_EXPIRED_LEGER_TERM",
            VoteResult::RejectSmallLegerEndIndex => "REJECT_SMALL_LEGER_END_INDEX",
            VoteResult::RejectTermSmallThanLeger => "REJECT_TERM_SMALL_THAN_LEGER",
            VoteResult::RejectAlreadyVoted => "REJECT_ALREADY_VOTED",
        }
    }
}

impl fmt::Display for VoteResult {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
