//! Replication of the ledger from the leader to its followers.
//!
//! On the leader, appends are written locally and fanned out by one
//! dispatcher per follower (see `dispatcher.rs`); the committed index moves
//! once a quorum holds an entry. On a follower, pushes and pulls land here and
//! are appended strictly in index order.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::stream;
use futures::Stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::EntryCursor;
use super::LeaderSession;
use crate::utils::cluster::quorum_index;
use crate::utils::worker_pool::WorkerPool;
use crate::AppendEntryResponse;
use crate::Entry;
use crate::Error;
use crate::Index;
use crate::InvariantViolation;
use crate::LeaderElector;
use crate::LedgerStore;
use crate::NodeId;
use crate::PullEntriesRequest;
use crate::PullEntriesResponse;
use crate::PushEntryRequest;
use crate::PushEntryResponse;
use crate::ReplicationConfig;
use crate::ResponseCode;
use crate::Result;
use crate::Role;
use crate::RoleSnapshot;
use crate::SharedMemberState;
use crate::StorageError;
use crate::SystemError;
use crate::Term;
use crate::Transport;
use crate::COMMITTED_INDEX_METRIC;
use crate::NO_TERM;

struct PendingAppend {
    term: Term,
    tx: oneshot::Sender<AppendEntryResponse>,
}

pub struct ReplicationCoordinator {
    pub(super) config: ReplicationConfig,
    pub(super) group: String,
    pub(super) self_id: NodeId,
    pub(super) member_state: SharedMemberState,
    pub(super) store: Arc<dyn LedgerStore>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) elector: Arc<LeaderElector>,
    pool: Arc<WorkerPool>,

    /// Held by every write to the local ledger
    append_lock: tokio::sync::Mutex<()>,
    /// Highest index made durable by the local store
    pub(super) persisted_tx: watch::Sender<Index>,
    pub(super) committed_tx: watch::Sender<Index>,
    waiters: Mutex<BTreeMap<Index, PendingAppend>>,
    session: Mutex<Option<Arc<LeaderSession>>>,
    catching_up: AtomicBool,

    pub(super) fatal_tx: mpsc::UnboundedSender<Error>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ReplicationCoordinator {
    pub fn new(
        config: ReplicationConfig,
        member_state: SharedMemberState,
        store: Arc<dyn LedgerStore>,
        transport: Arc<dyn Transport>,
        elector: Arc<LeaderElector>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let (group, self_id, ledger_end, committed) = {
            let state = member_state.lock();
            (
                state.group().to_string(),
                state.self_id().clone(),
                state.ledger_end_index(),
                state.committed_index(),
            )
        };
        let (persisted_tx, _) = watch::channel(ledger_end);
        let (committed_tx, _) = watch::channel(committed);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            config,
            group,
            self_id,
            member_state,
            store,
            transport,
            elector,
            pool,
            append_lock: tokio::sync::Mutex::new(()),
            persisted_tx,
            committed_tx,
            waiters: Mutex::new(BTreeMap::new()),
            session: Mutex::new(None),
            catching_up: AtomicBool::new(false),
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Follows role changes until `token` is cancelled: a leader session
    /// lives exactly as long as one leadership term. Returns `Err` when a
    /// background task hit a fatal error.
    pub async fn run(
        self: Arc<Self>,
        mut roles: watch::Receiver<RoleSnapshot>,
        token: CancellationToken,
    ) -> Result<()> {
        let mut fatal_rx = self
            .fatal_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal("replication coordinator is already running".into()))?;

        let snapshot = roles.borrow_and_update().clone();
        self.on_role_change(&snapshot);

        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(()),
                Some(e) = fatal_rx.recv() => {
                    error!("[{}] replication halted: {}", self.self_id, e);
                    break Err(e);
                }
                changed = roles.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    let snapshot = roles.borrow_and_update().clone();
                    self.on_role_change(&snapshot);
                }
            }
        };

        self.stop().await;
        result
    }

    /// Committed index changes, published as they happen.
    pub fn subscribe_committed(&self) -> watch::Receiver<Index> {
        self.committed_tx.subscribe()
    }

    // ---------------------------------------------------------------
    // Leader side

    /// Appends `payload` as the next entry of the current term and waits
    /// until a quorum holds it.
    ///
    /// Never waits longer than `append_timeout_ms`; a node that is not the
    /// leader answers `NOT_LEADER` with a leader hint.
    pub async fn append(
        self: &Arc<Self>,
        payload: Vec<u8>,
    ) -> Result<AppendEntryResponse> {
        let (rx, index, term) = {
            let _guard = self.append_lock.lock().await;

            let snapshot = self.member_state.lock().snapshot();
            if snapshot.role != Role::Leader {
                return Ok(not_leader(snapshot.leader_id));
            }
            let Some(session) = self.on_role_change(&snapshot) else {
                return Ok(not_leader(None));
            };

            let index = {
                let state = self.member_state.lock();
                if !state.is_leader() || state.current_term() != session.term {
                    return Ok(not_leader(state.leader_id().cloned()));
                }
                state.ledger_end_index() + 1
            };
            let term = session.term;

            let (tx, rx) = oneshot::channel();
            self.waiters.lock().insert(index, PendingAppend { term, tx });
            if let Err(e) = self.store.append(Entry::new(index, term, payload)).await {
                self.waiters.lock().remove(&index);
                return Err(e);
            }
            self.member_state.lock().update_ledger_end(index, term)?;
            self.persisted_tx.send_replace(index);
            debug!("[{}] appended index={} term={}", self.self_id, index, term);

            self.try_commit(&session);
            (rx, index, term)
        };

        match timeout(self.config.append_timeout(), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Ok(AppendEntryResponse {
                code: ResponseCode::InternalError,
                index,
                term,
                leader_id: None,
            }),
            Err(_) => {
                self.waiters.lock().remove(&index);
                warn!(
                    "[{}] index {} not acknowledged by a quorum within {:?}",
                    self.self_id,
                    index,
                    self.config.append_timeout()
                );
                Ok(AppendEntryResponse {
                    code: ResponseCode::WaitQuorumAckTimeout,
                    index,
                    term,
                    leader_id: None,
                })
            }
        }
    }

    /// Serves a follower's range fetch. Leader only.
    pub fn handle_pull(
        &self,
        request: &PullEntriesRequest,
    ) -> Result<PullEntriesResponse> {
        let (term, end) = {
            let state = self.member_state.lock();
            if !state.is_leader() {
                return Ok(PullEntriesResponse {
                    code: ResponseCode::NotLeader,
                    term: state.current_term(),
                    ..Default::default()
                });
            }
            (state.current_term(), state.ledger_end_index())
        };

        let from = request.from_index.max(0);
        let limit = match request.max_entries {
            0 => self.config.max_pull_batch,
            n => n.min(self.config.max_pull_batch),
        };
        let prev_term = self.stored_term(from - 1)?;

        let mut entries = Vec::with_capacity(limit);
        for item in EntryCursor::new(self.store.clone(), from, end).take(limit) {
            match item {
                Ok(entry) => entries.push(entry),
                // truncated after the leader check
                Err(Error::System(SystemError::Storage(StorageError::EntryNotFound(_)))) => break,
                Err(e) => return Err(e),
            }
        }
        debug!(
            "[{}] pull from {} at {}: {} entries",
            self.self_id,
            request.local_id,
            from,
            entries.len()
        );

        Ok(PullEntriesResponse {
            code: ResponseCode::Success,
            term,
            prev_term,
            entries,
        })
    }

    /// Local read path: only committed entries are visible.
    pub fn committed_entry(
        &self,
        index: Index,
    ) -> Result<Option<Entry>> {
        if index < 0 || index > self.member_state.lock().committed_index() {
            return Ok(None);
        }
        self.store.get(index)
    }

    /// Starts or reuses the session of the leadership term in `snapshot`,
    /// or ends the current session when this node is no longer leader.
    pub(super) fn on_role_change(
        self: &Arc<Self>,
        snapshot: &RoleSnapshot,
    ) -> Option<Arc<LeaderSession>> {
        let mut current = self.session.lock();

        if snapshot.role == Role::Leader {
            if let Some(session) = current.as_ref() {
                if session.term == snapshot.term && session.is_active() {
                    return Some(session.clone());
                }
            }
            if let Some(stale) = current.take() {
                stale.token.cancel();
            }
            let session = self.start_session(snapshot.term)?;
            *current = Some(session.clone());
            return Some(session);
        }

        if let Some(stale) = current.take() {
            stale.token.cancel();
            drop(current);
            info!(
                "[{}] leader session of term {} ended, now {}",
                self.self_id, stale.term, snapshot.role
            );
            self.fail_waiters(snapshot.leader_id.clone());
        }
        None
    }

    fn start_session(
        self: &Arc<Self>,
        term: Term,
    ) -> Option<Arc<LeaderSession>> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let (ledger_end, peers) = {
            let state = self.member_state.lock();
            if !state.is_leader() || state.current_term() != term {
                return None;
            }
            (state.ledger_end_index(), state.remote_peer_ids())
        };

        let session = Arc::new(LeaderSession::new(
            term,
            ledger_end,
            &peers,
            self.shutdown.child_token(),
        ));
        info!(
            "[{}] leader session for term {} starts at index {}",
            self.self_id, term, session.term_start_index
        );
        for peer in peers {
            self.tasks.spawn(self.clone().dispatch(session.clone(), peer));
        }
        Some(session)
    }

    /// Advances the committed index to the highest index held by a quorum,
    /// counting only indexes of the session's own term.
    pub(super) fn try_commit(
        &self,
        session: &LeaderSession,
    ) {
        let mut matched = session.match_indexes();
        matched.push(*self.persisted_tx.borrow());
        let Some(candidate) = quorum_index(matched) else {
            return;
        };
        if candidate < session.term_start_index {
            return;
        }

        let committed = {
            let mut state = self.member_state.lock();
            if !state.is_leader() || state.current_term() != session.term {
                return;
            }
            state.update_committed_index(candidate)
        };
        self.publish_committed(committed);
        self.complete_waiters(committed);
    }

    fn publish_committed(
        &self,
        committed: Index,
    ) {
        let advanced = self.committed_tx.send_if_modified(|current| {
            if committed > *current {
                *current = committed;
                true
            } else {
                false
            }
        });
        if advanced {
            COMMITTED_INDEX_METRIC
                .with_label_values(&[self.self_id.as_str()])
                .set(committed);
            debug!("[{}] committed index -> {}", self.self_id, committed);
        }
    }

    fn complete_waiters(
        &self,
        committed: Index,
    ) {
        let done = {
            let mut waiters = self.waiters.lock();
            let rest = waiters.split_off(&(committed + 1));
            std::mem::replace(&mut *waiters, rest)
        };
        for (index, pending) in done {
            let _ = pending.tx.send(AppendEntryResponse {
                code: ResponseCode::Success,
                index,
                term: pending.term,
                leader_id: Some(self.self_id.clone()),
            });
        }
    }

    fn fail_waiters(
        &self,
        leader_id: Option<NodeId>,
    ) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for (index, pending) in waiters {
            let _ = pending.tx.send(AppendEntryResponse {
                code: ResponseCode::NotLeader,
                index,
                term: pending.term,
                leader_id: leader_id.clone(),
            });
        }
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        let stale = self.session.lock().take();
        if let Some(session) = stale {
            session.token.cancel();
        }
        self.fail_waiters(None);
        self.tasks.close();
        self.tasks.wait().await;
        debug!("[{}] replication coordinator stopped", self.self_id);
    }

    // ---------------------------------------------------------------
    // Follower side

    /// Handles one push from the leader: an entry, or a commit-only probe of
    /// `prev_index`.
    pub async fn handle_push(
        self: &Arc<Self>,
        request: PushEntryRequest,
    ) -> Result<PushEntryResponse> {
        let claim = self.elector.accept_leader(request.term, &request.leader_id)?;
        if !claim.is_accepted() {
            return Ok(PushEntryResponse {
                code: claim.code,
                term: claim.term,
                acknowledged_index: self.member_state.lock().ledger_end_index(),
            });
        }

        let _guard = self.append_lock.lock().await;
        let (current_term, end) = {
            let state = self.member_state.lock();
            (state.current_term(), state.ledger_end_index())
        };
        if current_term > request.term {
            return Ok(PushEntryResponse {
                code: ResponseCode::ExpiredTerm,
                term: current_term,
                acknowledged_index: end,
            });
        }

        let (code, acknowledged_index) = match request.entry {
            Some(entry) if entry.index > end + 1 => {
                debug!(
                    "[{}] push of {} beyond ledger end {}",
                    self.self_id, entry.index, end
                );
                self.trigger_catch_up(&request.leader_id);
                (ResponseCode::OutOfOrder, end)
            }
            Some(entry) => self.apply_entry(entry, request.prev_term).await?,
            None if request.prev_index > end => {
                self.trigger_catch_up(&request.leader_id);
                (ResponseCode::OutOfOrder, end)
            }
            None => {
                if self.prefix_matches(request.prev_index, request.prev_term)? {
                    (ResponseCode::Success, request.prev_index)
                } else {
                    (ResponseCode::InconsistentState, end)
                }
            }
        };

        if code == ResponseCode::Success {
            self.follow_commit(request.committed_index.min(acknowledged_index));
        }
        Ok(PushEntryResponse {
            code,
            term: request.term,
            acknowledged_index,
        })
    }

    /// Writes a replicated entry whose predecessor has term `prev_term`.
    ///
    /// The caller holds the append lock. A conflicting suffix is truncated
    /// first; truncating a committed entry is fatal.
    async fn apply_entry(
        &self,
        entry: Entry,
        prev_term: Term,
    ) -> Result<(ResponseCode, Index)> {
        let (end, committed) = {
            let state = self.member_state.lock();
            (state.ledger_end_index(), state.committed_index())
        };
        let index = entry.index;
        if index < 0 {
            return Ok((ResponseCode::InconsistentState, end));
        }
        if index > end + 1 {
            return Ok((ResponseCode::OutOfOrder, end));
        }
        if !self.prefix_matches(index - 1, prev_term)? {
            return Ok((ResponseCode::InconsistentState, end));
        }

        if index <= end {
            match self.store.get(index)? {
                Some(existing) if existing.term == entry.term => {
                    return Ok((ResponseCode::Success, index));
                }
                _ => {
                    if index <= committed {
                        return Err(InvariantViolation::TruncateCommitted { index, committed }.into());
                    }
                    warn!(
                        "[{}] conflicting entry at {}, truncating ledger end {}",
                        self.self_id, index, end
                    );
                    self.store.truncate_from(index).await?;
                    self.member_state.lock().update_ledger_end(index - 1, prev_term)?;
                    self.persisted_tx.send_replace(index - 1);
                }
            }
        }

        let term = entry.term;
        self.store.append(entry).await?;
        self.member_state.lock().update_ledger_end(index, term)?;
        self.persisted_tx.send_replace(index);
        Ok((ResponseCode::Success, index))
    }

    fn prefix_matches(
        &self,
        prev_index: Index,
        prev_term: Term,
    ) -> Result<bool> {
        if prev_index < 0 {
            return Ok(prev_term == NO_TERM);
        }
        Ok(self.store.get(prev_index)?.map(|e| e.term) == Some(prev_term))
    }

    fn follow_commit(
        &self,
        index: Index,
    ) {
        let committed = self.member_state.lock().update_committed_index(index);
        self.publish_committed(committed);
    }

    fn stored_term(
        &self,
        index: Index,
    ) -> Result<Term> {
        if index < 0 {
            return Ok(NO_TERM);
        }
        Ok(self.store.get(index)?.map_or(NO_TERM, |e| e.term))
    }

    /// Starts a background pull from `leader_id` unless one is running.
    fn trigger_catch_up(
        self: &Arc<Self>,
        leader_id: &str,
    ) {
        if self.catching_up.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        let leader_id = leader_id.to_string();
        let spawned = self.pool.spawn(async move {
            if let Err(e) = this.catch_up(leader_id).await {
                if e.is_fatal() {
                    let _ = this.fatal_tx.send(e);
                } else {
                    warn!("[{}] catch-up failed: {}", this.self_id, e);
                }
            }
            this.catching_up.store(false, Ordering::Release);
        });
        if !spawned {
            self.catching_up.store(false, Ordering::Release);
        }
    }

    async fn catch_up(
        &self,
        leader_id: NodeId,
    ) -> Result<()> {
        let (term, from) = {
            let state = self.member_state.lock();
            (state.current_term(), state.ledger_end_index() + 1)
        };
        debug!("[{}] catching up from {} at {}", self.self_id, leader_id, from);

        let mut batches = Box::pin(self.pull_entries(leader_id, from));
        while let Some(batch) = batches.next().await {
            if batch.term != term {
                debug!("[{}] pull answered at term {}, stopping", self.self_id, batch.term);
                break;
            }
            let _guard = self.append_lock.lock().await;
            let mut prev_term = batch.prev_term;
            for entry in batch.entries {
                let entry_term = entry.term;
                let (code, _) = self.apply_entry(entry, prev_term).await?;
                if code != ResponseCode::Success {
                    debug!("[{}] pulled entry rejected: {}", self.self_id, code);
                    return Ok(());
                }
                prev_term = entry_term;
            }
        }
        Ok(())
    }

    /// Pulls `[from_index, ..)` from `leader_id` in batches until the leader
    /// has nothing more. Stops at the first non-success answer.
    pub fn pull_entries(
        &self,
        leader_id: NodeId,
        from_index: Index,
    ) -> impl Stream<Item = PullEntriesResponse> + Send + 'static {
        let transport = self.transport.clone();
        let group = self.group.clone();
        let self_id = self.self_id.clone();
        let max_entries = self.config.max_pull_batch;

        stream::unfold(from_index, move |from_index| {
            let transport = transport.clone();
            let request = PullEntriesRequest {
                group: group.clone(),
                remote_id: leader_id.clone(),
                local_id: self_id.clone(),
                from_index,
                max_entries,
            };
            async move {
                let response = transport.pull(request).await;
                if response.code != ResponseCode::Success {
                    debug!("pull stopped: {}", response.code);
                    return None;
                }
                let next = response.entries.last().map(|e| e.index + 1)?;
                Some((response, next))
            }
        })
    }
}

fn not_leader(leader_id: Option<NodeId>) -> AppendEntryResponse {
    AppendEntryResponse {
        code: ResponseCode::NotLeader,
        leader_id,
        ..Default::default()
    }
}
