//! A follower holding uncommitted entries of an older term has them
//! replaced by the leader's.
//!
//! Scenario:
//!
//! 1. n0 and n1 hold entries 0..=1 of term 2; n2 holds entries 0..=2 of
//!    term 1 that were never committed.
//! 2. Start the group; n2 cannot win because its ledger ends in an older
//!    term.
//! 3. Append one entry through the leader.
//!
//! Expected Result:
//!
//! - n2's ledger is truncated and rewritten to match the leader's
//! - the new entry commits on every node

use d_ledger::ResponseCode;

use crate::common::append;
use crate::common::ledger_of;
use crate::common::seeded_store;
use crate::common::wait_until;
use crate::common::TestCluster;

#[tokio::test]
async fn test_divergent_suffix_is_replaced() {
    let cluster = TestCluster::with_stores(vec![
        seeded_store(&[(0, 2), (1, 2)], 2).await,
        seeded_store(&[(0, 2), (1, 2)], 2).await,
        seeded_store(&[(0, 1), (1, 1), (2, 1)], 1).await,
    ]);
    cluster.start();

    let leader = cluster.wait_for_leader(&[]).await;
    assert_ne!(leader.self_id(), "n2");
    let term = leader.role_snapshot().term;

    let response = append(leader, "fresh").await;
    assert_eq!(response.code, ResponseCode::Success);
    assert_eq!(response.index, 2);

    let n2 = cluster.node("n2");
    wait_until("n2 to commit the new entry", || {
        n2.member_state().lock().committed_index() == 2
    })
    .await;
    assert_eq!(ledger_of(n2), vec![(0, 2), (1, 2), (2, term)]);
    assert_eq!(ledger_of(n2), ledger_of(leader));
    assert_eq!(n2.store().get(2).unwrap().unwrap().payload, b"fresh".to_vec());

    cluster.shutdown().await;
}
