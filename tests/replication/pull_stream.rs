//! Pulling the leader's ledger as a stream of batches.

use d_ledger::ResponseCode;
use futures::StreamExt;

use crate::common::append;
use crate::common::TestCluster;

#[tokio::test]
async fn test_pull_stream_reads_whole_ledger_in_batches() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;
    let follower = cluster
        .nodes
        .iter()
        .find(|n| n.self_id() != leader.self_id())
        .unwrap();
    for i in 0..10 {
        assert_eq!(append(leader, &format!("p-{}", i)).await.code, ResponseCode::Success);
    }

    let batches: Vec<_> = follower
        .coordinator()
        .pull_entries(leader.self_id().clone(), 3)
        .collect()
        .await;
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.code == ResponseCode::Success));
    assert!(batches.iter().all(|b| b.entries.len() <= 4));
    assert_eq!(batches[0].prev_term, leader.role_snapshot().term);

    let pulled: Vec<_> = batches.iter().flat_map(|b| b.entries.iter().cloned()).collect();
    let expected: Vec<_> = (3..10)
        .map(|i| leader.store().get(i).unwrap().unwrap())
        .collect();
    assert_eq!(pulled, expected);
    assert_eq!(pulled[0].payload, b"p-3".to_vec());
    assert_eq!(pulled.last().unwrap().payload, b"p-9".to_vec());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_pull_stream_from_follower_is_empty() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;
    let followers: Vec<_> = cluster
        .nodes
        .iter()
        .filter(|n| n.self_id() != leader.self_id())
        .collect();
    assert_eq!(append(leader, "x").await.code, ResponseCode::Success);

    let batches: Vec<_> = followers[0]
        .coordinator()
        .pull_entries(followers[1].self_id().clone(), 0)
        .collect()
        .await;
    assert!(batches.is_empty());

    cluster.shutdown().await;
}
