use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;

use super::*;
use crate::test_utils::entry;
use crate::test_utils::node_config;
use crate::test_utils::TEST_GROUP;
use crate::test_utils::TEST_RPC_TIMEOUT;
use crate::AppendEntryRequest;
use crate::Error;
use crate::GetEntriesRequest;
use crate::HardState;
use crate::HeartBeatRequest;
use crate::LedgerStore;
use crate::LocalNetwork;
use crate::MemoryLedgerStore;
use crate::MetadataRequest;
use crate::MockLedgerStore;
use crate::RequestHandler;
use crate::ResponseCode;
use crate::Role;
use crate::StorageError;
use crate::StoreType;
use crate::Transport;
use crate::VoteRequest;
use crate::VoteResult;
use crate::NO_INDEX;
use crate::NO_TERM;

fn single_node(network: &Arc<LocalNetwork>) -> (Node, watch::Sender<()>) {
    let (tx, rx) = watch::channel(());
    let node = NodeBuilder::from_config(node_config("n0", 1), rx)
        .build_local(network)
        .unwrap();
    (node, tx)
}

async fn wait_for_leader(node: &Node) {
    timeout(Duration::from_secs(5), async {
        while node.role_snapshot().role != Role::Leader {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("node should become leader");
}

fn append_request(payload: &str) -> AppendEntryRequest {
    AppendEntryRequest {
        group: TEST_GROUP.into(),
        remote_id: "n0".into(),
        local_id: "client".into(),
        payload: payload.as_bytes().to_vec(),
    }
}

/// # Case 1: requests for another group or another member are rejected at
/// the boundary
///
/// ## Validation criterias:
/// 1. wrong group answers UNKNOWN_GROUP
/// 2. wrong `remote_id` answers UNKNOWN_MEMBER
/// 3. well-addressed get and metadata requests answer UNSUPPORTED
#[tokio::test]
async fn test_boundary_checks_case1() {
    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (node, _tx) = single_node(&network);
    let server = node.server();

    let response = server
        .handle_vote(VoteRequest {
            group: "other".into(),
            remote_id: "n0".into(),
            local_id: "n0".into(),
            term: 1,
            leader_id: "n0".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.code, ResponseCode::UnknownGroup);
    assert_eq!(response.result, VoteResult::Unknown);

    let response = server
        .handle_heart_beat(HeartBeatRequest {
            group: TEST_GROUP.into(),
            remote_id: "n9".into(),
            local_id: "n0".into(),
            term: 1,
            leader_id: "n0".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.code, ResponseCode::UnknownMember);

    let response = server
        .handle_get(GetEntriesRequest {
            group: TEST_GROUP.into(),
            remote_id: "n0".into(),
            local_id: "client".into(),
            begin_index: 0,
        })
        .await
        .unwrap();
    assert_eq!(response.code, ResponseCode::Unsupported);

    let metadata = |group: &str| MetadataRequest {
        group: group.into(),
        remote_id: "n0".into(),
        local_id: "client".into(),
    };
    let response = server.handle_metadata(metadata("other")).await.unwrap();
    assert_eq!(response.code, ResponseCode::UnknownGroup);
    let response = server.handle_metadata(metadata(TEST_GROUP)).await.unwrap();
    assert_eq!(response.code, ResponseCode::Unsupported);
}

/// # Case 1: a single node elects itself and commits appends alone
#[tokio::test]
async fn test_single_node_append_case1() {
    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (node, _tx) = single_node(&network);
    node.start().unwrap();
    assert!(node.server_is_ready());
    wait_for_leader(&node).await;

    for i in 0..3 {
        let response = node
            .server()
            .handle_append(append_request(&format!("payload-{}", i)))
            .await
            .unwrap();
        assert_eq!(response.code, ResponseCode::Success);
        assert_eq!(response.index, i);
    }

    let state = node.role_snapshot();
    assert_eq!(node.member_state().lock().committed_index(), 2);
    let committed = node.coordinator().committed_entry(1).unwrap().unwrap();
    assert_eq!(committed.payload, b"payload-1".to_vec());
    assert_eq!(committed.term, state.term);
    assert!(node.coordinator().committed_entry(3).unwrap().is_none());

    node.shutdown().await;
    assert!(!node.server_is_ready());
}

/// # Case 1: a node restarts with the term, vote and ledger end of its store
#[tokio::test]
async fn test_builder_restores_state_case1() {
    let store = Arc::new(MemoryLedgerStore::new());
    for i in 0..3 {
        store.append(entry(i, 2)).await.unwrap();
    }
    store
        .save_hard_state(&HardState {
            current_term: 3,
            voted_for: Some("n1".into()),
        })
        .unwrap();

    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (_tx, rx) = watch::channel(());
    let node = NodeBuilder::from_config(node_config("n0", 3), rx)
        .store(store)
        .build_local(&network)
        .unwrap();

    let state = node.member_state().lock().clone();
    assert_eq!(state.role(), Role::Candidate);
    assert_eq!(state.current_term(), 3);
    assert_eq!(state.current_vote_for().map(String::as_str), Some("n1"));
    assert_eq!(state.ledger_end_index(), 2);
    assert_eq!(state.ledger_end_term(), 2);
    assert_eq!(state.committed_index(), NO_INDEX);
}

/// # Case 2: sled data survives a restart of the node
#[tokio::test]
async fn test_builder_restores_state_case2() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config("n0", 1);
    config.storage.store_type = StoreType::Sled;
    config.storage.data_dir = dir.path().to_path_buf();

    let term = {
        let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
        let (_tx, rx) = watch::channel(());
        let node = NodeBuilder::from_config(config.clone(), rx)
            .build_local(&network)
            .unwrap();
        node.start().unwrap();
        wait_for_leader(&node).await;
        let response = node.server().handle_append(append_request("kept")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Success);
        node.shutdown().await;
        response.term
    };
    assert!(dir.path().join(TEST_GROUP).join("n0").exists());

    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (_tx, rx) = watch::channel(());
    let node = NodeBuilder::from_config(config, rx)
        .build_local(&network)
        .unwrap();
    let state = node.member_state().lock().clone();
    assert_eq!(state.ledger_end_index(), 0);
    assert_eq!(state.ledger_end_term(), term);
    assert!(state.current_term() >= term);
    assert_eq!(node.store().get(0).unwrap().unwrap().payload, b"kept".to_vec());
}

/// # Case 1: a halted node stops answering
///
/// ## Validation criterias:
/// 1. every handler returns an error
/// 2. the node refuses to start
#[tokio::test]
async fn test_halt_case1() {
    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (node, _tx) = single_node(&network);
    node.server().halt(&Error::Fatal("test".into()));

    assert!(node.is_halted());
    assert!(node.server().handle_append(append_request("x")).await.is_err());
    assert!(node.start().is_err());
}

/// # Case 2: a storage failure while appending halts the node
#[tokio::test]
async fn test_halt_case2() {
    let mut store = MockLedgerStore::new();
    store.expect_load_hard_state().returning(|| Ok(None));
    store.expect_ledger_end().returning(|| (NO_INDEX, NO_TERM));
    store.expect_save_hard_state().returning(|_| Ok(()));
    store.expect_get().returning(|_| Ok(None));
    store.expect_flush().returning(|| Ok(()));
    store.expect_append().returning(|_| {
        Err(StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")).into())
    });

    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (_tx, rx) = watch::channel(());
    let node = NodeBuilder::from_config(node_config("n0", 1), rx)
        .store(Arc::new(store))
        .build_local(&network)
        .unwrap();
    node.start().unwrap();
    wait_for_leader(&node).await;

    let result = node.server().handle_append(append_request("lost")).await;
    assert!(result.unwrap_err().is_fatal());
    assert!(node.is_halted());

    // a halted node cannot be run again
    let result = timeout(Duration::from_secs(2), node.run()).await.unwrap();
    assert!(result.is_err());
}

/// # Case 1: a shutdown signal ends `run` and releases the endpoint
#[tokio::test]
async fn test_run_until_shutdown_case1() {
    let network = LocalNetwork::new(TEST_RPC_TIMEOUT);
    let (node, tx) = single_node(&network);

    tx.send(()).unwrap();
    timeout(Duration::from_secs(2), node.run())
        .await
        .unwrap()
        .unwrap();
    assert!(!node.server_is_ready());

    let response = network
        .transport("n1")
        .vote(VoteRequest {
            group: TEST_GROUP.into(),
            remote_id: "n0".into(),
            local_id: "n1".into(),
            term: 1,
            leader_id: "n1".into(),
            ..Default::default()
        })
        .await;
    assert_eq!(response.code, ResponseCode::NetworkError);
}
