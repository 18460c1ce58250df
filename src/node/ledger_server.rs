use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::AppendEntryRequest;
use crate::AppendEntryResponse;
use crate::Error;
use crate::GetEntriesRequest;
use crate::GetEntriesResponse;
use crate::HeartBeatRequest;
use crate::HeartBeatResponse;
use crate::LeaderElector;
use crate::LedgerRequest;
use crate::LedgerResponse;
use crate::MetadataRequest;
use crate::MetadataResponse;
use crate::NodeId;
use crate::PullEntriesRequest;
use crate::PullEntriesResponse;
use crate::PushEntryRequest;
use crate::PushEntryResponse;
use crate::ReplicationCoordinator;
use crate::RequestHandler;
use crate::ResponseCode;
use crate::Result;
use crate::VoteRequest;
use crate::VoteResponse;

/// Inbound entry point of one node: checks that a request is addressed to
/// this node of this group, then hands it to the elector or the
/// replication coordinator.
///
/// A fatal error from any handler halts the node: `token` is cancelled and
/// every later request fails.
pub struct LedgerServer {
    group: String,
    self_id: NodeId,
    elector: Arc<LeaderElector>,
    coordinator: Arc<ReplicationCoordinator>,
    token: CancellationToken,
    halted: AtomicBool,
}

impl LedgerServer {
    pub fn new(
        group: impl Into<String>,
        self_id: impl Into<NodeId>,
        elector: Arc<LeaderElector>,
        coordinator: Arc<ReplicationCoordinator>,
        token: CancellationToken,
    ) -> Self {
        Self {
            group: group.into(),
            self_id: self_id.into(),
            elector,
            coordinator,
            token,
            halted: AtomicBool::new(false),
        }
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.elector
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.coordinator
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stops the node's participation in the group for good.
    pub(crate) fn halt(
        &self,
        reason: &Error,
    ) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            error!("[{}] node halted: {}", self.self_id, reason);
        }
        self.token.cancel();
    }

    /// `Some(code)` when `request` must be rejected before it reaches the
    /// consensus core.
    fn check_boundary<R: LedgerRequest>(
        &self,
        request: &R,
    ) -> Result<Option<ResponseCode>> {
        if self.is_halted() {
            return Err(Error::Fatal(format!("node {} is halted", self.self_id)));
        }
        if request.group() != self.group {
            return Ok(Some(ResponseCode::UnknownGroup));
        }
        if request.remote_id() != self.self_id {
            return Ok(Some(ResponseCode::UnknownMember));
        }
        Ok(None)
    }

    fn observe<T>(
        &self,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.halt(e);
            }
        }
        result
    }
}

#[async_trait]
impl RequestHandler for LedgerServer {
    async fn handle_heart_beat(
        &self,
        request: HeartBeatRequest,
    ) -> Result<HeartBeatResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(HeartBeatResponse::with_code(code));
        }
        self.observe(self.elector.handle_heart_beat(&request))
    }

    async fn handle_vote(
        &self,
        request: VoteRequest,
    ) -> Result<VoteResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(VoteResponse::with_code(code));
        }
        self.observe(self.elector.handle_vote(request, false))
    }

    async fn handle_append(
        &self,
        request: AppendEntryRequest,
    ) -> Result<AppendEntryResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(AppendEntryResponse::with_code(code));
        }
        let result = self.coordinator.append(request.payload).await;
        self.observe(result)
    }

    /// Reads are served by `ReplicationCoordinator::committed_entry`
    /// locally, never over this path.
    async fn handle_get(
        &self,
        request: GetEntriesRequest,
    ) -> Result<GetEntriesResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(GetEntriesResponse::with_code(code));
        }
        Ok(GetEntriesResponse::with_code(ResponseCode::Unsupported))
    }

    async fn handle_metadata(
        &self,
        request: MetadataRequest,
    ) -> Result<MetadataResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(MetadataResponse::with_code(code));
        }
        Ok(MetadataResponse::with_code(ResponseCode::Unsupported))
    }

    async fn handle_pull(
        &self,
        request: PullEntriesRequest,
    ) -> Result<PullEntriesResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(PullEntriesResponse::with_code(code));
        }
        self.observe(self.coordinator.handle_pull(&request))
    }

    async fn handle_push(
        &self,
        request: PushEntryRequest,
    ) -> Result<PushEntryResponse> {
        if let Some(code) = self.check_boundary(&request)? {
            return Ok(PushEntryResponse::with_code(code));
        }
        let result = self.coordinator.handle_push(request).await;
        self.observe(result)
    }
}
