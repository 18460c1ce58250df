//! Per-node view of the group: identity, term, role, vote and ledger
//! watermarks.
//!
//! Mutators enforce the state invariants and return an
//! [`InvariantViolation`] instead of silently repairing a broken state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::utils::cluster::is_majority;
use crate::utils::cluster::majority_count;
use crate::HardState;
use crate::Index;
use crate::InvariantViolation;
use crate::NodeId;
use crate::Result;
use crate::Term;
use crate::NO_INDEX;
use crate::NO_TERM;

pub type SharedMemberState = Arc<Mutex<MemberState>>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Candidate,
    Follower,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Candidate => "CANDIDATE",
            Role::Follower => "FOLLOWER",
            Role::Leader => "LEADER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role, term and leader as published to other components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub role: Role,
    pub term: Term,
    pub leader_id: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MemberState {
    group: String,
    self_id: NodeId,
    peers: BTreeMap<NodeId, String>,

    role: Role,
    current_term: Term,
    known_max_term_in_group: Term,
    current_vote_for: Option<NodeId>,
    leader_id: Option<NodeId>,

    ledger_end_index: Index,
    ledger_end_term: Term,
    committed_index: Index,
}

impl MemberState {
    /// A fresh member starts as candidate with an empty ledger. `hard_state`
    /// restores the term and vote of a previous run.
    pub fn new(
        group: impl Into<String>,
        self_id: impl Into<NodeId>,
        peers: BTreeMap<NodeId, String>,
        hard_state: Option<HardState>,
    ) -> Self {
        let hard_state = hard_state.unwrap_or_default();
        Self {
            group: group.into(),
            self_id: self_id.into(),
            peers,
            role: Role::Candidate,
            current_term: hard_state.current_term,
            known_max_term_in_group: hard_state.current_term,
            current_vote_for: hard_state.voted_for,
            leader_id: None,
            ledger_end_index: NO_INDEX,
            ledger_end_term: NO_TERM,
            committed_index: NO_INDEX,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }
    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn current_term(&self) -> Term {
        self.current_term
    }
    pub fn known_max_term_in_group(&self) -> Term {
        self.known_max_term_in_group
    }
    pub fn current_vote_for(&self) -> Option<&NodeId> {
        self.current_vote_for.as_ref()
    }
    pub fn leader_id(&self) -> Option<&NodeId> {
        self.leader_id.as_ref()
    }
    pub fn ledger_end_index(&self) -> Index {
        self.ledger_end_index
    }
    pub fn ledger_end_term(&self) -> Term {
        self.ledger_end_term
    }
    pub fn committed_index(&self) -> Index {
        self.committed_index
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
    pub fn is_follower(&self) -> bool {
        self.role == Role::Follower
    }
    pub fn is_candidate(&self) -> bool {
        self.role == Role::Candidate
    }

    pub fn snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            role: self.role,
            term: self.current_term,
            leader_id: self.leader_id.clone(),
        }
    }

    pub fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.current_vote_for.clone(),
        }
    }

    // ---------------------------------------------------------------
    // Membership

    pub fn is_peer_member(
        &self,
        id: &str,
    ) -> bool {
        self.peers.contains_key(id)
    }

    pub fn peer_addr(
        &self,
        id: &str,
    ) -> Option<&str> {
        self.peers.get(id).map(String::as_str)
    }

    /// Every member other than this node.
    pub fn remote_peer_ids(&self) -> Vec<NodeId> {
        self.peers.keys().filter(|id| **id != self.self_id).cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn quorum_size(&self) -> usize {
        majority_count(self.peers.len())
    }

    pub fn is_quorum(
        &self,
        num: usize,
    ) -> bool {
        is_majority(num, self.peers.len())
    }

    // ---------------------------------------------------------------
    // Role transitions

    /// Steps into candidacy for at least `term`.
    ///
    /// The term itself only moves on [`MemberState::next_term`]; here a
    /// higher `term` is recorded as the highest known in the group.
    pub fn change_to_candidate(
        &mut self,
        term: Term,
    ) -> Result<()> {
        if term < self.current_term {
            return Err(InvariantViolation::TermRegression {
                current: self.current_term,
                requested: term,
            }
            .into());
        }
        if term > self.known_max_term_in_group {
            self.known_max_term_in_group = term;
        }
        if self.role != Role::Candidate {
            info!(
                "[{}] {} -> CANDIDATE at term {}",
                self.self_id, self.role, self.current_term
            );
        }
        self.role = Role::Candidate;
        self.leader_id = None;
        Ok(())
    }

    /// Opens a new term for this candidate and returns it.
    ///
    /// Jumps straight to the highest term known in the group when that is
    /// ahead, otherwise increments. The vote is cleared.
    pub fn next_term(&mut self) -> Result<Term> {
        if self.role != Role::Candidate {
            return Err(crate::ConsensusError::RoleViolation {
                current_role: self.role.as_str(),
                required_role: Role::Candidate.as_str(),
            }
            .into());
        }
        if self.known_max_term_in_group > self.current_term {
            self.current_term = self.known_max_term_in_group;
        } else {
            self.current_term += 1;
            self.known_max_term_in_group = self.current_term;
        }
        self.current_vote_for = None;
        self.leader_id = None;
        debug!("[{}] next term {}", self.self_id, self.current_term);
        Ok(self.current_term)
    }

    /// Moves to exactly `term`, learnt from another member's request, as a
    /// candidate without a vote or leader.
    ///
    /// Unlike [`MemberState::next_term`] this never jumps past `term`, so the
    /// sender of that request can still be followed or voted for.
    pub fn adopt_term(
        &mut self,
        term: Term,
    ) -> Result<()> {
        if term <= self.current_term {
            return Err(InvariantViolation::TermRegression {
                current: self.current_term,
                requested: term,
            }
            .into());
        }
        if self.role != Role::Candidate {
            info!(
                "[{}] {} -> CANDIDATE at term {}",
                self.self_id, self.role, term
            );
        }
        self.role = Role::Candidate;
        self.current_term = term;
        self.known_max_term_in_group = self.known_max_term_in_group.max(term);
        self.current_vote_for = None;
        self.leader_id = None;
        debug!("[{}] adopted term {}", self.self_id, term);
        Ok(())
    }

    /// Returns `false` when the round for `term` is stale.
    pub fn change_to_leader(
        &mut self,
        term: Term,
    ) -> bool {
        if self.role != Role::Candidate || self.current_term != term {
            return false;
        }
        info!("[{}] CANDIDATE -> LEADER at term {}", self.self_id, term);
        self.role = Role::Leader;
        self.leader_id = Some(self.self_id.clone());
        true
    }

    pub fn change_to_follower(
        &mut self,
        term: Term,
        leader_id: &str,
    ) -> Result<()> {
        if term != self.current_term {
            return Err(InvariantViolation::FollowerTermMismatch {
                current: self.current_term,
                requested: term,
            }
            .into());
        }
        if leader_id == self.self_id || !self.is_peer_member(leader_id) {
            return Err(InvariantViolation::InvalidLeader {
                term,
                leader: leader_id.to_string(),
            }
            .into());
        }
        if self.role != Role::Follower || self.leader_id.as_deref() != Some(leader_id) {
            info!(
                "[{}] {} -> FOLLOWER of {} at term {}",
                self.self_id, self.role, leader_id, term
            );
        }
        self.role = Role::Follower;
        self.leader_id = Some(leader_id.to_string());
        Ok(())
    }

    /// Records the vote of the current term. Voting again for the same
    /// candidate is a no-op.
    pub fn set_vote_for(
        &mut self,
        candidate: &str,
    ) -> Result<()> {
        match &self.current_vote_for {
            Some(voted) if voted != candidate => Err(InvariantViolation::DoubleVote {
                term: self.current_term,
                voted_for: voted.clone(),
                candidate: candidate.to_string(),
            }
            .into()),
            _ => {
                self.current_vote_for = Some(candidate.to_string());
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // Ledger watermarks

    pub fn update_ledger_end(
        &mut self,
        index: Index,
        term: Term,
    ) -> Result<()> {
        if (index == NO_INDEX) != (term == NO_TERM) {
            return Err(InvariantViolation::LedgerEndMismatch { index, term }.into());
        }
        if self.committed_index > index {
            return Err(InvariantViolation::CommittedBeyondLedgerEnd {
                committed: self.committed_index,
                ledger_end: index,
            }
            .into());
        }
        self.ledger_end_index = index;
        self.ledger_end_term = term;
        Ok(())
    }

    /// Advances the committed index, capped at the ledger end. Lower values
    /// are ignored. Returns the resulting committed index.
    pub fn update_committed_index(
        &mut self,
        index: Index,
    ) -> Index {
        let capped = index.min(self.ledger_end_index);
        if capped > self.committed_index {
            self.committed_index = capped;
        }
        self.committed_index
    }
}
