//! Shared helpers for the unit tests of every module.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ClusterConfig;
use crate::ElectionConfig;
use crate::Entry;
use crate::Index;
use crate::LedgerConfig;
use crate::MemberState;
use crate::NodeId;
use crate::ReplicationConfig;
use crate::SharedMemberState;
use crate::StorageConfig;
use crate::StoreType;
use crate::Term;

pub const TEST_GROUP: &str = "g";

/// Peers `n0..n{count-1}` with placeholder addresses.
pub fn peers(count: usize) -> BTreeMap<NodeId, String> {
    (0..count)
        .map(|i| (format!("n{}", i), format!("127.0.0.1:{}", 30000 + i)))
        .collect()
}

pub fn member_state(
    self_id: &str,
    peer_count: usize,
) -> MemberState {
    MemberState::new(TEST_GROUP, self_id, peers(peer_count), None)
}

pub fn shared_member_state(
    self_id: &str,
    peer_count: usize,
) -> SharedMemberState {
    Arc::new(Mutex::new(member_state(self_id, peer_count)))
}

/// Election timings small enough for tests to run through several rounds.
pub fn fast_election_config() -> ElectionConfig {
    ElectionConfig {
        heart_beat_interval_ms: 50,
        max_heart_beat_leak: 3,
        min_vote_interval_ms: 20,
        max_vote_interval_ms: 60,
        state_maintain_interval_ms: 5,
    }
}

pub fn fast_replication_config() -> ReplicationConfig {
    ReplicationConfig {
        append_timeout_ms: 1000,
        max_pull_batch: 8,
        push_retry_backoff_ms: 10,
        probe_interval_ms: 50,
    }
}

pub const TEST_RPC_TIMEOUT: Duration = Duration::from_millis(200);

pub fn entry(
    index: Index,
    term: Term,
) -> Entry {
    Entry::new(index, term, format!("entry-{}", index).into_bytes())
}

/// Configuration of node `self_id` in a `peer_count` group with fast timings
/// and an in-memory store.
pub fn node_config(
    self_id: &str,
    peer_count: usize,
) -> LedgerConfig {
    let peers = peers(peer_count)
        .into_iter()
        .map(|(id, addr)| format!("{}-{}", id, addr))
        .collect::<Vec<_>>()
        .join(";");

    let mut config = LedgerConfig {
        cluster: ClusterConfig {
            group: TEST_GROUP.to_string(),
            self_id: self_id.to_string(),
            peers,
            ..Default::default()
        },
        election: fast_election_config(),
        replication: fast_replication_config(),
        storage: StorageConfig {
            store_type: StoreType::Memory,
            ..Default::default()
        },
        ..Default::default()
    };
    config.network.rpc_timeout_ms = TEST_RPC_TIMEOUT.as_millis() as u64;
    config
}
