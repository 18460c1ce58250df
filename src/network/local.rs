use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

use super::call;
use super::FrameChannel;
use super::RemotingCommand;
use super::RpcService;
use super::Transport;
use crate::AppendEntryRequest;
use crate::AppendEntryResponse;
use crate::GetEntriesRequest;
use crate::GetEntriesResponse;
use crate::HeartBeatRequest;
use crate::HeartBeatResponse;
use crate::MetadataRequest;
use crate::MetadataResponse;
use crate::NetworkError;
use crate::NodeId;
use crate::PullEntriesRequest;
use crate::PullEntriesResponse;
use crate::PushEntryRequest;
use crate::PushEntryResponse;
use crate::Result;
use crate::VoteRequest;
use crate::VoteResponse;

/// In-process network connecting several nodes of one process.
///
/// Frames are still encoded and handled on each node's worker pool, so the
/// path through the stack matches a real transport. Nodes can be isolated
/// to simulate partitions.
pub struct LocalNetwork {
    services: RwLock<HashMap<NodeId, Arc<RpcService>>>,
    isolated: RwLock<HashSet<NodeId>>,
    rpc_timeout: Duration,
}

impl LocalNetwork {
    pub fn new(rpc_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            isolated: RwLock::new(HashSet::new()),
            rpc_timeout,
        })
    }

    pub fn register(
        &self,
        id: impl Into<NodeId>,
        service: Arc<RpcService>,
    ) {
        self.services.write().insert(id.into(), service);
    }

    pub fn unregister(
        &self,
        id: &str,
    ) {
        self.services.write().remove(id);
    }

    /// Drops all traffic from and to `id` until [`LocalNetwork::heal`].
    pub fn isolate(
        &self,
        id: &str,
    ) {
        self.isolated.write().insert(id.to_string());
    }

    pub fn heal(
        &self,
        id: &str,
    ) {
        self.isolated.write().remove(id);
    }

    pub fn transport(
        self: &Arc<Self>,
        self_id: impl Into<NodeId>,
    ) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            self_id: self_id.into(),
        }
    }

    fn is_cut(
        &self,
        from: &str,
        to: &str,
    ) -> bool {
        let isolated = self.isolated.read();
        isolated.contains(from) || isolated.contains(to)
    }

    async fn deliver(
        &self,
        from: &str,
        to: &str,
        request: RemotingCommand,
    ) -> Result<RemotingCommand> {
        if self.is_cut(from, to) {
            return Err(NetworkError::Unreachable(to.to_string()).into());
        }
        let service = self
            .services
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| NetworkError::Unreachable(to.to_string()))?;

        trace!("{} -> {}: {}", from, to, request.code.as_str());
        let (tx, rx) = oneshot::channel();
        service.spawn_request(request, move |result| {
            let _ = tx.send(result);
        });

        let result = match timeout(self.rpc_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetworkError::ConnectionClosed(to.to_string()).into()),
            Err(_) => Err(NetworkError::Timeout {
                node_id: to.to_string(),
                duration: self.rpc_timeout,
            }
            .into()),
        };

        // a partition raised while the call was in flight swallows the reply
        if self.is_cut(from, to) {
            return Err(NetworkError::Unreachable(to.to_string()).into());
        }
        result
    }
}

/// A node's handle on a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    self_id: NodeId,
}

#[async_trait]
impl FrameChannel for LocalTransport {
    async fn invoke(
        &self,
        remote_id: &str,
        request: RemotingCommand,
    ) -> Result<RemotingCommand> {
        self.network.deliver(&self.self_id, remote_id, request).await
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn heart_beat(
        &self,
        request: HeartBeatRequest,
    ) -> HeartBeatResponse {
        call(self, request).await
    }

    async fn vote(
        &self,
        request: VoteRequest,
    ) -> VoteResponse {
        call(self, request).await
    }

    async fn append(
        &self,
        request: AppendEntryRequest,
    ) -> AppendEntryResponse {
        call(self, request).await
    }

    async fn get(
        &self,
        request: GetEntriesRequest,
    ) -> GetEntriesResponse {
        call(self, request).await
    }

    async fn metadata(
        &self,
        request: MetadataRequest,
    ) -> MetadataResponse {
        call(self, request).await
    }

    async fn pull(
        &self,
        request: PullEntriesRequest,
    ) -> PullEntriesResponse {
        call(self, request).await
    }

    async fn push(
        &self,
        request: PushEntryRequest,
    ) -> PushEntryResponse {
        call(self, request).await
    }
}
