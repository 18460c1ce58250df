use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Index;
use crate::NodeId;
use crate::Term;
use crate::NO_INDEX;

/// What the leader knows about one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerProgress {
    /// Next index to push
    pub next_index: Index,
    /// Highest index known to match the leader's ledger
    pub match_index: Index,
    /// Commit index carried by the last acknowledged push
    pub sent_commit: Index,
}

/// State of one leadership term, dropped as soon as the term ends.
pub(crate) struct LeaderSession {
    pub(crate) term: Term,
    /// First index written in this term. Earlier entries only commit along
    /// with a later one of this term.
    pub(crate) term_start_index: Index,
    progress: Mutex<HashMap<NodeId, PeerProgress>>,
    pub(crate) token: CancellationToken,
}

impl LeaderSession {
    pub(crate) fn new(
        term: Term,
        ledger_end_index: Index,
        peers: &[NodeId],
        token: CancellationToken,
    ) -> Self {
        let progress = peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    PeerProgress {
                        next_index: ledger_end_index + 1,
                        match_index: NO_INDEX,
                        sent_commit: NO_INDEX,
                    },
                )
            })
            .collect();
        Self {
            term,
            term_start_index: ledger_end_index + 1,
            progress: Mutex::new(progress),
            token,
        }
    }

    pub(crate) fn progress_of(
        &self,
        peer: &str,
    ) -> Option<PeerProgress> {
        self.progress.lock().get(peer).copied()
    }

    pub(crate) fn update(
        &self,
        peer: &str,
        f: impl FnOnce(&mut PeerProgress),
    ) {
        if let Some(progress) = self.progress.lock().get_mut(peer) {
            f(progress);
        }
    }

    pub(crate) fn match_indexes(&self) -> Vec<Index> {
        self.progress.lock().values().map(|p| p.match_index).collect()
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}
