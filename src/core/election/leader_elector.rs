//! Leader election and leader liveness.
//!
//! One maintain loop per node drives the role it currently holds: a leader
//! sends heartbeats, a follower watches for them, a candidate runs vote
//! rounds. Inbound votes, heartbeats and leader claims carried by pushes are
//! decided here too, always under the member state lock.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::judge_vote;
use crate::utils::cluster::majority_count;
use crate::ElectionConfig;
use crate::HeartBeatRequest;
use crate::HeartBeatResponse;
use crate::LedgerStore;
use crate::MemberState;
use crate::ResponseCode;
use crate::Result;
use crate::RoleSnapshot;
use crate::SharedMemberState;
use crate::Term;
use crate::Transport;
use crate::VoteRequest;
use crate::VoteResponse;
use crate::VoteResult;
use crate::ELECTION_ROUND_METRIC;
use crate::ROLE_TRANSITION_METRIC;
use crate::VOTE_RESULT_METRIC;

/// How a vote round ended, from the candidate's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRoundOutcome {
    /// A quorum accepted
    Passed,
    /// Some voter is already at a higher term
    HigherTerm(Term),
    /// Some voter already follows a leader of this term
    AlreadyHasLeader,
    /// Neither a quorum nor a reason to hurry
    WaitToVoteNext,
}

impl VoteRoundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteRoundOutcome::Passed => "passed",
            VoteRoundOutcome::HigherTerm(_) => "higher_term",
            VoteRoundOutcome::AlreadyHasLeader => "already_has_leader",
            VoteRoundOutcome::WaitToVoteNext => "wait_to_vote_next",
        }
    }
}

/// Verdict on a leader claim made by a heartbeat or a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderClaim {
    pub code: ResponseCode,
    /// Term of this node after the decision
    pub term: Term,
}

impl LeaderClaim {
    pub fn is_accepted(&self) -> bool {
        self.code == ResponseCode::Success
    }
}

#[derive(Debug, Default)]
pub(crate) struct VoteTally {
    pub(crate) valid: usize,
    pub(crate) accepted: usize,
    pub(crate) bigger_ledger: usize,
    pub(crate) already_has_leader: bool,
    pub(crate) max_term: Term,
}

impl VoteTally {
    pub(crate) fn record(
        &mut self,
        response: &VoteResponse,
    ) {
        if response.code != ResponseCode::Success {
            return;
        }
        self.valid += 1;
        match response.result {
            VoteResult::Accept => self.accepted += 1,
            VoteResult::RejectAlreadyHasLeader => self.already_has_leader = true,
            VoteResult::RejectExpiredVoteTerm | VoteResult::RejectTermSmallThanLeger => {
                self.max_term = self.max_term.max(response.term);
            }
            VoteResult::RejectExpiredLegerTerm | VoteResult::RejectSmallLegerEndIndex => {
                self.bigger_ledger += 1;
            }
            _ => {}
        }
    }

    pub(crate) fn outcome(
        &self,
        term: Term,
        quorum: usize,
    ) -> VoteRoundOutcome {
        if self.max_term > term {
            VoteRoundOutcome::HigherTerm(self.max_term)
        } else if self.already_has_leader {
            VoteRoundOutcome::AlreadyHasLeader
        } else if self.accepted >= quorum {
            VoteRoundOutcome::Passed
        } else {
            VoteRoundOutcome::WaitToVoteNext
        }
    }

    fn is_decided(
        &self,
        term: Term,
        quorum: usize,
    ) -> bool {
        self.outcome(term, quorum) != VoteRoundOutcome::WaitToVoteNext
    }
}

#[derive(Debug, Default)]
struct HeartBeatTally {
    success: usize,
    inconsistent_leader: usize,
    max_term: Term,
}

impl HeartBeatTally {
    fn record(
        &mut self,
        response: &HeartBeatResponse,
    ) {
        match response.code {
            ResponseCode::Success => self.success += 1,
            ResponseCode::ExpiredTerm => self.max_term = self.max_term.max(response.term),
            ResponseCode::InconsistentLeader => self.inconsistent_leader += 1,
            _ => {}
        }
    }
}

struct ElectionTiming {
    /// Follower: last accepted leader traffic. Leader: last heartbeat round
    /// acknowledged by a quorum.
    last_leader_heart_beat: Instant,
    last_send_heart_beat: Option<Instant>,
    next_time_to_request_vote: Instant,
}

pub struct LeaderElector {
    config: ElectionConfig,
    rpc_timeout: Duration,
    member_state: SharedMemberState,
    store: Arc<dyn LedgerStore>,
    transport: Arc<dyn Transport>,
    role_tx: watch::Sender<RoleSnapshot>,
    timing: Mutex<ElectionTiming>,
}

impl LeaderElector {
    pub fn new(
        config: ElectionConfig,
        rpc_timeout: Duration,
        member_state: SharedMemberState,
        store: Arc<dyn LedgerStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (role_tx, _) = watch::channel(member_state.lock().snapshot());
        let now = Instant::now();
        let first_vote = now + random_duration(0, config.min_vote_interval_ms);
        Self {
            config,
            rpc_timeout,
            member_state,
            store,
            transport,
            role_tx,
            timing: Mutex::new(ElectionTiming {
                last_leader_heart_beat: now,
                last_send_heart_beat: None,
                next_time_to_request_vote: first_vote,
            }),
        }
    }

    /// Role changes, published as they happen.
    pub fn subscribe(&self) -> watch::Receiver<RoleSnapshot> {
        self.role_tx.subscribe()
    }

    /// Runs the maintain loop until `token` is cancelled. Returns `Err` only
    /// for fatal errors.
    pub async fn run(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.state_maintain_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("leader elector stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                result = self.maintain_state() => result,
            };
            if let Err(e) = result {
                if e.is_fatal() {
                    error!("leader elector halted: {}", e);
                    return Err(e);
                }
                warn!("maintain state failed: {}", e);
            }
        }
    }

    pub async fn maintain_state(&self) -> Result<()> {
        let role = self.member_state.lock().role();
        match role {
            crate::Role::Leader => self.maintain_as_leader().await?,
            crate::Role::Follower => self.maintain_as_follower()?,
            crate::Role::Candidate => self.maintain_as_candidate().await?,
        }
        // picks up changes made to the state from outside this loop
        self.publish(&self.member_state.lock());
        Ok(())
    }

    // ---------------------------------------------------------------
    // Inbound decisions

    /// Decides a vote request. A request from a known peer with a higher
    /// term first moves this node to that term as a candidate.
    pub fn handle_vote(
        &self,
        request: VoteRequest,
        self_directed: bool,
    ) -> Result<VoteResponse> {
        let mut state = self.member_state.lock();
        let candidate = request.leader_id.as_str();
        let legit_candidate =
            state.is_peer_member(candidate) && (self_directed || candidate != state.self_id());

        if legit_candidate && request.term > state.current_term() {
            debug!(
                "[{}] vote request from {} carries term {}, adopting it",
                state.self_id(),
                candidate,
                request.term
            );
            state.adopt_term(request.term)?;
            self.persist(&state)?;
            self.postpone_vote(Instant::now());
            self.publish(&state);
        }

        let result = judge_vote(&state, &request, self_directed);
        if result == VoteResult::Accept {
            state.set_vote_for(candidate)?;
            self.persist(&state)?;
            if !self_directed {
                self.postpone_vote(Instant::now());
            }
        }

        VOTE_RESULT_METRIC
            .with_label_values(&[state.self_id().as_str(), result.as_str()])
            .inc();
        debug!(
            "[{}] vote for {} at term {}: {}",
            state.self_id(),
            candidate,
            request.term,
            result
        );

        Ok(VoteResponse {
            code: ResponseCode::Success,
            term: state.current_term(),
            result,
        })
    }

    pub fn handle_heart_beat(
        &self,
        request: &HeartBeatRequest,
    ) -> Result<HeartBeatResponse> {
        let claim = self.accept_leader(request.term, &request.leader_id)?;
        Ok(HeartBeatResponse {
            code: claim.code,
            term: claim.term,
        })
    }

    /// Judges `leader_id`'s claim to lead `term` and follows it when valid.
    ///
    /// Accepted claims refresh the leader lease.
    pub fn accept_leader(
        &self,
        term: Term,
        leader_id: &str,
    ) -> Result<LeaderClaim> {
        let mut state = self.member_state.lock();
        let current = state.current_term();
        let reject = |code| Ok(LeaderClaim {
            code,
            term: current,
        });

        if !state.is_peer_member(leader_id) {
            return reject(ResponseCode::UnknownMember);
        }
        if leader_id == state.self_id() {
            return reject(ResponseCode::UnexpectedMember);
        }
        if term < current {
            return reject(ResponseCode::ExpiredTerm);
        }

        if term > current {
            state.adopt_term(term)?;
            state.change_to_follower(term, leader_id)?;
            self.persist(&state)?;
        } else {
            let known_leader = state.leader_id().cloned();
            match known_leader {
                None => state.change_to_follower(term, leader_id)?,
                Some(known) if known == leader_id => {}
                Some(known) => {
                    warn!(
                        "[{}] {} claims term {} already led by {}",
                        state.self_id(),
                        leader_id,
                        term,
                        known
                    );
                    return reject(ResponseCode::InconsistentLeader);
                }
            }
        }

        self.timing.lock().last_leader_heart_beat = Instant::now();
        self.publish(&state);
        Ok(LeaderClaim {
            code: ResponseCode::Success,
            term,
        })
    }

    /// Gives up leadership after a follower reported `observed_term`.
    pub fn step_down(
        &self,
        observed_term: Term,
    ) -> Result<()> {
        let mut state = self.member_state.lock();
        if !state.is_leader() {
            return Ok(());
        }
        let term = observed_term.max(state.current_term());
        info!("[{}] stepping down, observed term {}", state.self_id(), term);
        state.change_to_candidate(term)?;
        self.postpone_vote(Instant::now());
        self.publish(&state);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Maintain loop

    async fn maintain_as_leader(&self) -> Result<()> {
        let now = Instant::now();
        {
            let mut timing = self.timing.lock();
            if let Some(last) = timing.last_send_heart_beat {
                if now.duration_since(last) < self.config.heart_beat_interval() {
                    return Ok(());
                }
            }
            timing.last_send_heart_beat = Some(now);
        }

        let (term, quorum, requests) = {
            let state = self.member_state.lock();
            if !state.is_leader() {
                return Ok(());
            }
            let term = state.current_term();
            let requests: Vec<HeartBeatRequest> = state
                .remote_peer_ids()
                .into_iter()
                .map(|peer| HeartBeatRequest {
                    group: state.group().to_string(),
                    remote_id: peer,
                    local_id: state.self_id().clone(),
                    term,
                    leader_id: state.self_id().clone(),
                })
                .collect();
            (term, state.quorum_size(), requests)
        };

        let tally = self.send_heart_beats(term, quorum, requests).await;

        let mut state = self.member_state.lock();
        if !state.is_leader() || state.current_term() != term {
            return Ok(());
        }

        if tally.max_term > term {
            info!(
                "[{}] heartbeat found higher term {}, stepping down",
                state.self_id(),
                tally.max_term
            );
            state.change_to_candidate(tally.max_term)?;
            self.postpone_vote(Instant::now());
        } else if tally.success >= quorum {
            self.timing.lock().last_leader_heart_beat = now;
        } else if tally.inconsistent_leader + 1 >= quorum {
            warn!(
                "[{}] a quorum follows another leader of term {}, stepping down",
                state.self_id(),
                term
            );
            state.change_to_candidate(term)?;
            self.postpone_vote(Instant::now());
        } else {
            let silent = now.duration_since(self.timing.lock().last_leader_heart_beat);
            if silent > self.config.leader_lease() {
                warn!(
                    "[{}] no quorum for {:?}, stepping down from term {}",
                    state.self_id(),
                    silent,
                    term
                );
                state.change_to_candidate(term)?;
                self.postpone_vote(Instant::now());
            }
        }
        self.publish(&state);
        Ok(())
    }

    fn maintain_as_follower(&self) -> Result<()> {
        let mut state = self.member_state.lock();
        if !state.is_follower() {
            return Ok(());
        }
        let silent = self.timing.lock().last_leader_heart_beat.elapsed();
        if silent > self.config.leader_lease() {
            info!(
                "[{}] no traffic from leader {:?} for {:?}",
                state.self_id(),
                state.leader_id(),
                silent
            );
            let term = state.current_term();
            state.change_to_candidate(term)?;
            self.timing.lock().next_time_to_request_vote =
                Instant::now() + random_duration(0, self.config.min_vote_interval_ms);
            self.publish(&state);
        }
        Ok(())
    }

    async fn maintain_as_candidate(&self) -> Result<()> {
        if Instant::now() < self.timing.lock().next_time_to_request_vote {
            return Ok(());
        }

        let (term, quorum, own_request, requests) = {
            let mut state = self.member_state.lock();
            if !state.is_candidate() {
                return Ok(());
            }
            let term = state.next_term()?;
            self.persist(&state)?;
            self.publish(&state);

            let make_request = |remote_id: &str| VoteRequest {
                group: state.group().to_string(),
                remote_id: remote_id.to_string(),
                local_id: state.self_id().clone(),
                term,
                leader_id: state.self_id().clone(),
                ledger_end_index: state.ledger_end_index(),
                ledger_end_term: state.ledger_end_term(),
            };
            let own_request = make_request(state.self_id());
            let requests: Vec<VoteRequest> = state
                .remote_peer_ids()
                .iter()
                .map(|peer| make_request(peer))
                .collect();
            (term, majority_count(state.peer_count()), own_request, requests)
        };

        let own_vote = self.handle_vote(own_request, true)?;
        let mut tally = VoteTally::default();
        tally.record(&own_vote);
        let tally = self.request_votes(term, quorum, requests, tally).await;
        let outcome = tally.outcome(term, quorum);

        let now = Instant::now();
        let mut state = self.member_state.lock();
        ELECTION_ROUND_METRIC
            .with_label_values(&[state.self_id().as_str(), outcome.as_str()])
            .inc();
        info!(
            "[{}] vote round for term {}: {:?} (accepted {}, valid {}, bigger ledger {})",
            state.self_id(),
            term,
            outcome,
            tally.accepted,
            tally.valid,
            tally.bigger_ledger
        );

        match outcome {
            VoteRoundOutcome::Passed => {
                if state.change_to_leader(term) {
                    let mut timing = self.timing.lock();
                    timing.last_leader_heart_beat = now;
                    timing.last_send_heart_beat = None;
                }
            }
            VoteRoundOutcome::HigherTerm(max_term) => {
                if state.is_candidate() && max_term >= state.current_term() {
                    state.change_to_candidate(max_term)?;
                }
                self.postpone_vote(now);
            }
            VoteRoundOutcome::AlreadyHasLeader => {
                self.timing.lock().next_time_to_request_vote = now
                    + self.config.leader_lease()
                    + random_duration(self.config.min_vote_interval_ms, self.config.max_vote_interval_ms);
            }
            VoteRoundOutcome::WaitToVoteNext => self.postpone_vote(now),
        }
        self.publish(&state);
        Ok(())
    }

    async fn request_votes(
        &self,
        term: Term,
        quorum: usize,
        requests: Vec<VoteRequest>,
        mut tally: VoteTally,
    ) -> VoteTally {
        let mut pending: FuturesUnordered<JoinHandle<VoteResponse>> = requests
            .into_iter()
            .map(|request| {
                let transport = self.transport.clone();
                tokio::spawn(async move { transport.vote(request).await })
            })
            .collect();

        let deadline = Instant::now() + self.rpc_timeout;
        while !tally.is_decided(term, quorum) {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok(response))) => tally.record(&response),
                Ok(Some(Err(e))) => warn!("vote task failed: {}", e),
                Ok(None) | Err(_) => break,
            }
        }
        tally
    }

    async fn send_heart_beats(
        &self,
        term: Term,
        quorum: usize,
        requests: Vec<HeartBeatRequest>,
    ) -> HeartBeatTally {
        let mut pending: FuturesUnordered<JoinHandle<HeartBeatResponse>> = requests
            .into_iter()
            .map(|request| {
                let transport = self.transport.clone();
                tokio::spawn(async move { transport.heart_beat(request).await })
            })
            .collect();

        // the leader acknowledges itself
        let mut tally = HeartBeatTally {
            success: 1,
            ..Default::default()
        };
        let deadline = Instant::now() + self.rpc_timeout;
        while tally.success < quorum && tally.max_term <= term {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok(response))) => tally.record(&response),
                Ok(Some(Err(e))) => warn!("heartbeat task failed: {}", e),
                Ok(None) | Err(_) => break,
            }
        }
        tally
    }

    // ---------------------------------------------------------------
    // Helpers

    fn postpone_vote(
        &self,
        now: Instant,
    ) {
        self.timing.lock().next_time_to_request_vote = now
            + random_duration(self.config.min_vote_interval_ms, self.config.max_vote_interval_ms);
    }

    fn persist(
        &self,
        state: &MemberState,
    ) -> Result<()> {
        self.store.save_hard_state(&state.hard_state())
    }

    fn publish(
        &self,
        state: &MemberState,
    ) {
        let snapshot = state.snapshot();
        let self_id = state.self_id();
        self.role_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            if current.role != snapshot.role {
                ROLE_TRANSITION_METRIC
                    .with_label_values(&[self_id.as_str(), snapshot.role.as_str()])
                    .inc();
            }
            *current = snapshot;
            true
        });
    }
}

/// Uniform duration in `[min_ms, max_ms]`.
pub(crate) fn random_duration(
    min_ms: u64,
    max_ms: u64,
) -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..=max_ms.max(min_ms)))
}
