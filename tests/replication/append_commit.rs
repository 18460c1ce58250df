//! Appends through the leader of a three-node group.
//!
//! Expected Result:
//!
//! - appends get consecutive indexes of the leader's term
//! - every node ends up with the same committed ledger
//! - a follower answers NOT_LEADER with the leader as hint

use d_ledger::ResponseCode;

use crate::common::append;
use crate::common::ledger_of;
use crate::common::wait_until;
use crate::common::TestCluster;

#[tokio::test]
async fn test_append_commits_on_every_node() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;
    let term = leader.role_snapshot().term;

    for i in 0..10 {
        let response = append(leader, &format!("value-{}", i)).await;
        assert_eq!(response.code, ResponseCode::Success);
        assert_eq!(response.index, i);
        assert_eq!(response.term, term);
    }
    assert_eq!(leader.member_state().lock().committed_index(), 9);

    wait_until("followers to commit index 9", || {
        cluster
            .nodes
            .iter()
            .all(|n| n.member_state().lock().committed_index() == 9)
    })
    .await;

    let expected = ledger_of(leader);
    for node in &cluster.nodes {
        assert_eq!(ledger_of(node), expected);
        let entry = node.coordinator().committed_entry(4).unwrap().unwrap();
        assert_eq!(entry.payload, b"value-4".to_vec());
        assert!(node.coordinator().committed_entry(10).unwrap().is_none());
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_append_on_follower_returns_leader_hint() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;
    let follower = cluster
        .nodes
        .iter()
        .find(|n| n.self_id() != leader.self_id())
        .unwrap();

    let response = append(follower, "misdirected").await;
    assert_eq!(response.code, ResponseCode::NotLeader);
    assert_eq!(response.leader_id.as_ref(), Some(leader.self_id()));
    assert_eq!(follower.member_state().lock().ledger_end_index(), -1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_appends_keep_index_order() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;

    let payloads: Vec<String> = (0..8).map(|i| format!("concurrent-{}", i)).collect();
    let responses =
        futures::future::join_all(payloads.iter().map(|p| append(leader, p))).await;
    let mut indexes: Vec<_> = responses
        .iter()
        .map(|r| {
            assert_eq!(r.code, ResponseCode::Success);
            r.index
        })
        .collect();
    indexes.sort_unstable();
    assert_eq!(indexes, (0..8).collect::<Vec<_>>());

    wait_until("followers to hold all entries", || {
        cluster
            .nodes
            .iter()
            .all(|n| n.member_state().lock().ledger_end_index() == 7)
    })
    .await;

    cluster.shutdown().await;
}
