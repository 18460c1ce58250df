use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::LeaderSession;
use super::PeerProgress;
use super::ReplicationCoordinator;
use crate::storage::term_at;
use crate::Index;
use crate::NodeId;
use crate::PushEntryRequest;
use crate::ResponseCode;
use crate::Result;
use crate::PUSH_FAILURE_METRIC;

enum PushFlow {
    Continue,
    Backoff,
    Stop,
}

impl ReplicationCoordinator {
    /// Pushes the leader's ledger to `peer` in index order for as long as
    /// `session` is active.
    pub(super) async fn dispatch(
        self: Arc<Self>,
        session: Arc<LeaderSession>,
        peer: NodeId,
    ) {
        debug!(
            "[{}] dispatcher for {} started in term {}",
            self.self_id, peer, session.term
        );
        let mut persisted = self.persisted_tx.subscribe();
        let mut committed = self.committed_tx.subscribe();
        let mut last_push: Option<Instant> = None;

        while session.is_active() {
            let Some(progress) = session.progress_of(&peer) else {
                break;
            };
            let end = *persisted.borrow_and_update();
            let commit = *committed.borrow_and_update();

            let has_work = progress.next_index <= end
                || progress.match_index + 1 < progress.next_index
                || commit > progress.sent_commit;
            let idle = last_push.map_or(true, |at| at.elapsed() >= self.config.probe_interval());
            if !has_work && !idle {
                tokio::select! {
                    _ = session.token.cancelled() => break,
                    _ = persisted.changed() => {}
                    _ = committed.changed() => {}
                    _ = tokio::time::sleep(self.config.probe_interval()) => {}
                }
                continue;
            }

            last_push = Some(Instant::now());
            match self.push_once(&session, &peer, progress, end, commit).await {
                Ok(PushFlow::Continue) => {}
                Ok(PushFlow::Backoff) => {
                    tokio::select! {
                        _ = session.token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.push_retry_backoff()) => {}
                    }
                }
                Ok(PushFlow::Stop) => break,
                Err(e) => {
                    if !session.is_active() {
                        break;
                    }
                    if e.is_fatal() {
                        let _ = self.fatal_tx.send(e);
                        break;
                    }
                    warn!("[{}] push to {} failed: {}", self.self_id, peer, e);
                    tokio::time::sleep(self.config.push_retry_backoff()).await;
                }
            }
        }
        debug!(
            "[{}] dispatcher for {} in term {} stopped",
            self.self_id, peer, session.term
        );
    }

    async fn push_once(
        &self,
        session: &LeaderSession,
        peer: &str,
        progress: PeerProgress,
        end: Index,
        commit: Index,
    ) -> Result<PushFlow> {
        let (request, pushed) = self.build_push(session, peer, progress.next_index, end, commit)?;
        let response = self.transport.push(request).await;
        if !session.is_active() {
            return Ok(PushFlow::Stop);
        }

        match response.code {
            ResponseCode::Success => {
                session.update(peer, |p| {
                    p.match_index = p.match_index.max(pushed);
                    p.next_index = p.next_index.max(pushed + 1);
                    p.sent_commit = p.sent_commit.max(commit);
                });
                self.try_commit(session);
                Ok(PushFlow::Continue)
            }
            ResponseCode::OutOfOrder => {
                let follower_end = response.acknowledged_index;
                session.update(peer, |p| {
                    p.next_index = follower_end + 1;
                    p.match_index = p.match_index.min(follower_end);
                });
                Ok(PushFlow::Continue)
            }
            ResponseCode::InconsistentState => {
                self.record_failure(peer, response.code);
                let follower_end = response.acknowledged_index;
                session.update(peer, |p| {
                    p.next_index = (p.next_index - 1).min(follower_end + 1).max(0);
                    p.match_index = p.match_index.min(p.next_index - 1);
                });
                Ok(PushFlow::Continue)
            }
            ResponseCode::ExpiredTerm | ResponseCode::InconsistentLeader => {
                self.record_failure(peer, response.code);
                warn!(
                    "[{}] {} rejected leadership of term {}: {} (term {})",
                    self.self_id, peer, session.term, response.code, response.term
                );
                self.elector.step_down(response.term)?;
                Ok(PushFlow::Stop)
            }
            code => {
                self.record_failure(peer, code);
                debug!("[{}] push to {} answered {}", self.self_id, peer, code);
                Ok(PushFlow::Backoff)
            }
        }
    }

    /// Builds the push of `next_index`, or a commit-only probe of
    /// `next_index - 1` when there is nothing to send. Also returns the index
    /// a successful answer confirms.
    fn build_push(
        &self,
        session: &LeaderSession,
        peer: &str,
        next_index: Index,
        end: Index,
        commit: Index,
    ) -> Result<(PushEntryRequest, Index)> {
        let entry = if next_index <= end {
            self.store.get(next_index)?
        } else {
            None
        };
        let prev_index = match &entry {
            Some(entry) => entry.index - 1,
            None => next_index.min(end + 1) - 1,
        };
        let prev_term = term_at(self.store.as_ref(), prev_index)?;
        let confirmed = entry.as_ref().map_or(prev_index, |e| e.index);

        let request = PushEntryRequest {
            group: self.group.clone(),
            remote_id: peer.to_string(),
            local_id: self.self_id.clone(),
            term: session.term,
            leader_id: self.self_id.clone(),
            prev_index,
            prev_term,
            entry,
            committed_index: commit,
        };
        Ok((request, confirmed))
    }

    fn record_failure(
        &self,
        peer: &str,
        code: ResponseCode,
    ) {
        PUSH_FAILURE_METRIC
            .with_label_values(&[self.self_id.as_str(), peer, code.as_str()])
            .inc();
    }
}
