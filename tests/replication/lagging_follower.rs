//! A follower cut off while the leader keeps committing catches up after
//! the partition heals.

use d_ledger::ResponseCode;

use crate::common::append;
use crate::common::ledger_of;
use crate::common::wait_until;
use crate::common::TestCluster;

#[tokio::test]
async fn test_lagging_follower_catches_up() {
    let cluster = TestCluster::new(3);
    cluster.start();
    let leader = cluster.wait_for_leader(&[]).await;
    let lagging = cluster
        .nodes
        .iter()
        .find(|n| n.self_id() != leader.self_id())
        .unwrap();

    assert_eq!(append(leader, "shared").await.code, ResponseCode::Success);
    wait_until("every node to hold index 0", || {
        cluster
            .nodes
            .iter()
            .all(|n| n.member_state().lock().ledger_end_index() == 0)
    })
    .await;

    cluster.network.isolate(lagging.self_id());
    for i in 0..6 {
        let response = append(leader, &format!("missed-{}", i)).await;
        assert_eq!(response.code, ResponseCode::Success);
    }
    assert_eq!(lagging.member_state().lock().ledger_end_index(), 0);
    cluster.network.heal(lagging.self_id());

    wait_until("lagging follower to commit index 6", || {
        lagging.member_state().lock().committed_index() == 6
    })
    .await;
    assert_eq!(ledger_of(lagging), ledger_of(leader));

    cluster.shutdown().await;
}
