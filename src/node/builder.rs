//! Assembles a [`Node`] from a [`LedgerConfig`].
//!
//! The builder opens the store selected by `storage.store_type`, restores
//! the persisted term, vote and ledger end into a fresh member state, and
//! wires elector, replication coordinator and request handler to one of the
//! two transports:
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::from_config(config, shutdown_rx)
//!     .build_tcp()
//!     .await?;
//! node.run().await?;
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::node::Endpoint;
use super::LedgerServer;
use super::Node;
use crate::utils::worker_pool::WorkerPool;
use crate::LeaderElector;
use crate::LedgerConfig;
use crate::LedgerStore;
use crate::LocalNetwork;
use crate::MemberState;
use crate::MemoryLedgerStore;
use crate::NodeId;
use crate::ReplicationCoordinator;
use crate::Result;
use crate::RpcServer;
use crate::RpcService;
use crate::SharedMemberState;
use crate::SledLedgerStore;
use crate::StoreType;
use crate::TcpTransport;
use crate::Transport;

pub struct NodeBuilder {
    config: LedgerConfig,
    store: Option<Arc<dyn LedgerStore>>,
    shutdown_signal: watch::Receiver<()>,
}

impl NodeBuilder {
    /// Loads the configuration from defaults, `config_path` and the
    /// environment.
    pub fn new(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let config = LedgerConfig::load(config_path)?;
        Ok(Self::from_config(config, shutdown_signal))
    }

    pub fn from_config(
        config: LedgerConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            store: None,
            shutdown_signal,
        }
    }

    /// Uses `store` instead of opening the one named by the configuration.
    pub fn store(
        mut self,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Builds a node that talks TCP to its peers and serves on its own
    /// address from `cluster.peers`.
    pub async fn build_tcp(self) -> Result<Node> {
        self.config.validate()?;
        let peers = self.config.cluster.peer_map()?;
        let self_addr = self.config.cluster.self_addr()?;
        let max_frame_bytes = self.config.network.max_frame_bytes;
        let transport = Arc::new(TcpTransport::new(peers, &self.config.network));

        let parts = self.assemble(transport)?;
        let (addr, handle) = RpcServer::bind(
            &self_addr,
            parts.service.clone(),
            max_frame_bytes,
            parts.token.child_token(),
        )
        .await?;

        Ok(parts.into_node(Endpoint::Tcp {
            addr,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Builds a node attached to an in-process `network`.
    pub fn build_local(
        self,
        network: &Arc<LocalNetwork>,
    ) -> Result<Node> {
        self.config.validate()?;
        let transport = Arc::new(network.transport(self.config.cluster.self_id.clone()));

        let parts = self.assemble(transport)?;
        network.register(parts.self_id.clone(), parts.service.clone());
        Ok(parts.into_node(Endpoint::Local(network.clone())))
    }

    fn assemble(
        self,
        transport: Arc<dyn Transport>,
    ) -> Result<Parts> {
        let config = self.config;
        let group = config.cluster.group.clone();
        let self_id = config.cluster.self_id.clone();

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config)?,
        };

        let mut state = MemberState::new(
            group.clone(),
            self_id.clone(),
            config.cluster.peer_map()?,
            store.load_hard_state()?,
        );
        let (end_index, end_term) = store.ledger_end();
        state.update_ledger_end(end_index, end_term)?;
        info!(
            "[{}] restored term={} vote={:?} ledger end=({}, {})",
            self_id,
            state.current_term(),
            state.current_vote_for(),
            end_index,
            end_term
        );
        let member_state = Arc::new(Mutex::new(state));

        let pool = Arc::new(WorkerPool::new(
            format!("{}-{}", group, self_id),
            config.network.worker_pool_size,
        ));
        let elector = Arc::new(LeaderElector::new(
            config.election.clone(),
            config.network.rpc_timeout(),
            member_state.clone(),
            store.clone(),
            transport.clone(),
        ));
        let coordinator = ReplicationCoordinator::new(
            config.replication.clone(),
            member_state.clone(),
            store.clone(),
            transport,
            elector.clone(),
            pool.clone(),
        );

        let token = CancellationToken::new();
        let server = Arc::new(LedgerServer::new(
            group,
            self_id.clone(),
            elector,
            coordinator,
            token.clone(),
        ));
        let service = RpcService::new(server.clone(), pool.clone());

        Ok(Parts {
            self_id,
            member_state,
            store,
            server,
            service,
            pool,
            shutdown_signal: self.shutdown_signal,
            token,
        })
    }
}

/// Everything but the endpoint.
struct Parts {
    self_id: NodeId,
    member_state: SharedMemberState,
    store: Arc<dyn LedgerStore>,
    server: Arc<LedgerServer>,
    service: Arc<RpcService>,
    pool: Arc<WorkerPool>,
    shutdown_signal: watch::Receiver<()>,
    token: CancellationToken,
}

impl Parts {
    fn into_node(
        self,
        endpoint: Endpoint,
    ) -> Node {
        Node {
            self_id: self.self_id,
            member_state: self.member_state,
            store: self.store,
            server: self.server,
            service: self.service,
            pool: self.pool,
            endpoint,
            shutdown_signal: self.shutdown_signal,
            token: self.token,
            tasks: TaskTracker::new(),
            ready: AtomicBool::new(false),
        }
    }
}

/// Opens the store named by `storage.store_type`; sled keeps each node under
/// `data_dir/<group>/<self_id>`.
fn open_store(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.storage.store_type {
        StoreType::Memory => Ok(Arc::new(MemoryLedgerStore::new())),
        StoreType::Sled => {
            let path = config
                .storage
                .data_dir
                .join(&config.cluster.group)
                .join(&config.cluster.self_id);
            info!("opening sled ledger at {}", path.display());
            Ok(Arc::new(SledLedgerStore::open(path)?))
        }
    }
}
