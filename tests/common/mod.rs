use std::sync::Arc;
use std::time::Duration;

use d_ledger::AppendEntryRequest;
use d_ledger::AppendEntryResponse;
use d_ledger::ClusterConfig;
use d_ledger::ElectionConfig;
use d_ledger::Entry;
use d_ledger::HardState;
use d_ledger::Index;
use d_ledger::LedgerConfig;
use d_ledger::LedgerStore;
use d_ledger::LocalNetwork;
use d_ledger::MemoryLedgerStore;
use d_ledger::Node;
use d_ledger::NodeBuilder;
use d_ledger::ReplicationConfig;
use d_ledger::RequestHandler;
use d_ledger::Role;
use d_ledger::StorageConfig;
use d_ledger::StoreType;
use d_ledger::Term;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;

pub const GROUP: &str = "it";
pub const RPC_TIMEOUT_MS: u64 = 200;
pub const WAIT_FOR_CLUSTER: Duration = Duration::from_secs(10);

pub fn node_id(i: usize) -> String {
    format!("n{}", i)
}

/// Fast timings so a test sees several election rounds per second.
pub fn node_config(
    self_id: &str,
    size: usize,
) -> LedgerConfig {
    let peers = (0..size)
        .map(|i| format!("{}-127.0.0.1:{}", node_id(i), 31000 + i))
        .collect::<Vec<_>>()
        .join(";");

    let mut config = LedgerConfig {
        cluster: ClusterConfig {
            group: GROUP.to_string(),
            self_id: self_id.to_string(),
            peers,
            ..Default::default()
        },
        election: ElectionConfig {
            heart_beat_interval_ms: 50,
            max_heart_beat_leak: 3,
            min_vote_interval_ms: 50,
            max_vote_interval_ms: 150,
            state_maintain_interval_ms: 5,
        },
        replication: ReplicationConfig {
            append_timeout_ms: 2000,
            max_pull_batch: 4,
            push_retry_backoff_ms: 10,
            probe_interval_ms: 50,
        },
        storage: StorageConfig {
            store_type: StoreType::Memory,
            ..Default::default()
        },
        ..Default::default()
    };
    config.network.rpc_timeout_ms = RPC_TIMEOUT_MS;
    config
}

/// Store holding `entries` as `(index, term)` pairs and the given term.
pub async fn seeded_store(
    entries: &[(Index, Term)],
    current_term: Term,
) -> Arc<MemoryLedgerStore> {
    let store = Arc::new(MemoryLedgerStore::new());
    for (index, term) in entries {
        store
            .append(Entry::new(*index, *term, format!("seed-{}-{}", index, term).into_bytes()))
            .await
            .unwrap();
    }
    store
        .save_hard_state(&HardState {
            current_term,
            voted_for: None,
        })
        .unwrap();
    store
}

pub struct TestCluster {
    pub network: Arc<LocalNetwork>,
    pub nodes: Vec<Node>,
    _shutdown_tx: watch::Sender<()>,
}

impl TestCluster {
    pub fn new(size: usize) -> Self {
        Self::with_stores((0..size).map(|_| Arc::new(MemoryLedgerStore::new())).collect())
    }

    /// One node per store, `n0..`, not started yet.
    pub fn with_stores(stores: Vec<Arc<MemoryLedgerStore>>) -> Self {
        let network = LocalNetwork::new(Duration::from_millis(RPC_TIMEOUT_MS));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let size = stores.len();
        let nodes = stores
            .into_iter()
            .enumerate()
            .map(|(i, store)| {
                NodeBuilder::from_config(node_config(&node_id(i), size), shutdown_rx.clone())
                    .store(store)
                    .build_local(&network)
                    .unwrap()
            })
            .collect();
        Self {
            network,
            nodes,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn start(&self) {
        for node in &self.nodes {
            node.start().unwrap();
        }
    }

    pub fn node(
        &self,
        id: &str,
    ) -> &Node {
        self.nodes
            .iter()
            .find(|n| n.self_id() == id)
            .unwrap_or_else(|| panic!("no node {}", id))
    }

    /// The node that leads every member outside `excluded`, once they all
    /// agree on it.
    pub async fn wait_for_leader(
        &self,
        excluded: &[&str],
    ) -> &Node {
        let members: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| !excluded.contains(&n.self_id().as_str()))
            .collect();

        let found = timeout(WAIT_FOR_CLUSTER, async {
            loop {
                if let Some(leader) = agreed_leader(&members) {
                    return leader;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        found.expect("members should agree on a leader")
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

fn agreed_leader<'a>(members: &[&'a Node]) -> Option<&'a Node> {
    let snapshots: Vec<_> = members.iter().map(|n| n.role_snapshot()).collect();
    let leaders: Vec<usize> = (0..members.len())
        .filter(|i| snapshots[*i].role == Role::Leader)
        .collect();
    if leaders.len() != 1 {
        return None;
    }
    let leader = leaders[0];
    let expected = &snapshots[leader];
    let agreed = snapshots.iter().all(|s| {
        s.term == expected.term && s.leader_id == expected.leader_id && s.role != Role::Candidate
    });
    agreed.then_some(members[leader])
}

/// Polls `condition` until it holds or the cluster wait expires.
pub async fn wait_until(
    what: &str,
    condition: impl Fn() -> bool,
) {
    let reached = timeout(WAIT_FOR_CLUSTER, async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

pub async fn append(
    node: &Node,
    payload: &str,
) -> AppendEntryResponse {
    node.server()
        .handle_append(AppendEntryRequest {
            group: GROUP.to_string(),
            remote_id: node.self_id().clone(),
            local_id: "client".to_string(),
            payload: payload.as_bytes().to_vec(),
        })
        .await
        .unwrap()
}

/// `(index, term)` of every stored entry from 0 to the ledger end.
pub fn ledger_of(node: &Node) -> Vec<(Index, Term)> {
    let (end, _) = node.store().ledger_end();
    (0..=end)
        .map(|i| {
            let entry = node.store().get(i).unwrap().unwrap();
            (entry.index, entry.term)
        })
        .collect()
}
