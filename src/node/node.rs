use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::LedgerServer;
use crate::utils::worker_pool::WorkerPool;
use crate::Error;
use crate::LeaderElector;
use crate::LedgerStore;
use crate::LocalNetwork;
use crate::NodeId;
use crate::ReplicationCoordinator;
use crate::Result;
use crate::RoleSnapshot;
use crate::RpcService;
use crate::SharedMemberState;

/// Where the node receives requests from.
pub(super) enum Endpoint {
    Local(Arc<LocalNetwork>),
    Tcp {
        addr: SocketAddr,
        handle: Mutex<Option<JoinHandle<()>>>,
    },
}

/// One member of a ledger group with everything it owns: member state,
/// store, elector, replication coordinator, worker pool and endpoint.
pub struct Node {
    pub(super) self_id: NodeId,
    pub(super) member_state: SharedMemberState,
    pub(super) store: Arc<dyn LedgerStore>,
    pub(super) server: Arc<LedgerServer>,
    pub(super) service: Arc<RpcService>,
    pub(super) pool: Arc<WorkerPool>,
    pub(super) endpoint: Endpoint,
    pub(super) shutdown_signal: watch::Receiver<()>,
    pub(super) token: CancellationToken,
    pub(super) tasks: TaskTracker,
    pub(super) ready: AtomicBool,
}

impl Node {
    /// Starts the maintain loop and the replication coordinator. Calling it
    /// twice is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.server.is_halted() {
            return Err(Error::Fatal(format!("node {} is halted", self.self_id)));
        }
        if self.ready.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let elector = self.elector().clone();
        let server = self.server.clone();
        let token = self.token.child_token();
        self.tasks.spawn(async move {
            if let Err(e) = elector.run(token).await {
                server.halt(&e);
            }
        });

        let coordinator = self.coordinator().clone();
        let roles = self.elector().subscribe();
        let server = self.server.clone();
        let token = self.token.child_token();
        self.tasks.spawn(async move {
            if let Err(e) = coordinator.run(roles, token).await {
                server.halt(&e);
            }
        });

        info!("[{}] node started", self.self_id);
        Ok(())
    }

    /// Starts the node and serves until the shutdown signal fires or the
    /// node halts. A halted node returns `Err`.
    pub async fn run(&self) -> Result<()> {
        self.start()?;

        let mut signal = self.shutdown_signal.clone();
        tokio::select! {
            _ = signal.changed() => info!("[{}] shutdown signal received", self.self_id),
            _ = self.token.cancelled() => {}
        }
        self.shutdown().await;

        if self.server.is_halted() {
            return Err(Error::Fatal(format!("node {} halted", self.self_id)));
        }
        Ok(())
    }

    /// Stops every task of the node and releases its endpoint.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        match &self.endpoint {
            Endpoint::Local(network) => network.unregister(&self.self_id),
            Endpoint::Tcp { handle, .. } => {
                let handle = handle.lock().take();
                if let Some(handle) = handle {
                    if let Err(e) = handle.await {
                        warn!("[{}] rpc server task failed: {}", self.self_id, e);
                    }
                }
            }
        }

        self.pool.shutdown().await;
        if let Err(e) = self.store.flush().await {
            warn!("[{}] final flush failed: {}", self.self_id, e);
        }
        self.ready.store(false, Ordering::Release);
        debug!("[{}] node stopped", self.self_id);
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn server_is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_halted(&self) -> bool {
        self.server.is_halted()
    }

    pub fn role_snapshot(&self) -> RoleSnapshot {
        self.member_state.lock().snapshot()
    }

    pub fn member_state(&self) -> &SharedMemberState {
        &self.member_state
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn server(&self) -> &Arc<LedgerServer> {
        &self.server
    }

    pub fn service(&self) -> &Arc<RpcService> {
        &self.service
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        self.server.elector()
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        self.server.coordinator()
    }

    /// Address the TCP server is bound to; `None` on the in-process network.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Tcp { addr, .. } => Some(*addr),
            Endpoint::Local(_) => None,
        }
    }
}
