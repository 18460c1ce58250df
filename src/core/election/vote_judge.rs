use crate::MemberState;
use crate::VoteRequest;
use crate::VoteResult;

/// Decides a vote request against this node's state.
///
/// Pure: recording an `Accept` is left to the caller. `self_directed` marks
/// a candidate voting for itself. Requests for a term above the current one
/// must have been adopted before calling.
pub fn judge_vote(
    state: &MemberState,
    request: &VoteRequest,
    self_directed: bool,
) -> VoteResult {
    let candidate = request.leader_id.as_str();

    if !state.is_peer_member(candidate) {
        return VoteResult::RejectUnknownLeader;
    }

    // A node never grants a vote for itself that it did not ask for.
    if !self_directed && candidate == state.self_id() {
        return VoteResult::RejectUnexpectedLeader;
    }

    if request.term < state.current_term() {
        return VoteResult::RejectExpiredVoteTerm;
    }

    if request.term == state.current_term() {
        if let Some(leader) = state.leader_id() {
            let already_chosen = leader == candidate
                || state.current_vote_for().map(String::as_str) == Some(candidate);
            if !already_chosen {
                return VoteResult::RejectAlreadyHasLeader;
            }
        }
    }

    if request.ledger_end_term < state.ledger_end_term() {
        return VoteResult::RejectExpiredLegerTerm;
    }

    if request.ledger_end_term == state.ledger_end_term()
        && request.ledger_end_index < state.ledger_end_index()
    {
        return VoteResult::RejectSmallLegerEndIndex;
    }

    if request.term < state.ledger_end_term() {
        return VoteResult::RejectTermSmallThanLeger;
    }

    if let Some(voted) = state.current_vote_for() {
        if voted != candidate {
            return VoteResult::RejectAlreadyVoted;
        }
    }

    VoteResult::Accept
}
