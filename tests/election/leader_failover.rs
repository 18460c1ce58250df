//! Losing the leader to a partition.
//!
//! Scenario:
//!
//! 1. Start a three-node group and commit one entry.
//! 2. Isolate the leader.
//! 3. Wait for the other two to elect a new leader and commit through it.
//! 4. Heal the partition.
//!
//! Expected Result:
//!
//! - the isolated leader gives up leadership once its lease runs out, and
//!   appends against it fail
//! - the new leader runs at a higher term
//! - after healing, the old leader follows the new one and holds its ledger

use d_ledger::ResponseCode;
use d_ledger::Role;
use tracing_test::traced_test;

use crate::common::append;
use crate::common::ledger_of;
use crate::common::wait_until;
use crate::common::TestCluster;

#[tokio::test]
#[traced_test]
async fn test_isolated_leader_steps_down() {
    let cluster = TestCluster::new(3);
    cluster.start();

    let old_leader = cluster.wait_for_leader(&[]).await;
    let old_id = old_leader.self_id().clone();
    let old_term = old_leader.role_snapshot().term;
    assert_eq!(append(old_leader, "before").await.code, ResponseCode::Success);

    cluster.network.isolate(&old_id);

    wait_until("isolated leader to step down", || {
        old_leader.role_snapshot().role != Role::Leader
    })
    .await;
    let response = append(old_leader, "lost").await;
    assert_eq!(response.code, ResponseCode::NotLeader);

    let new_leader = cluster.wait_for_leader(&[old_id.as_str()]).await;
    assert_ne!(new_leader.self_id(), &old_id);
    let new_term = new_leader.role_snapshot().term;
    assert!(new_term > old_term);
    let response = append(new_leader, "after").await;
    assert_eq!(response.code, ResponseCode::Success);
    assert_eq!(response.index, 1);
    assert_eq!(response.term, new_term);

    cluster.network.heal(&old_id);

    let leader = cluster.wait_for_leader(&[]).await;
    wait_until("ledgers to converge", || {
        let expected = ledger_of(leader);
        cluster.nodes.iter().all(|n| ledger_of(n) == expected)
    })
    .await;
    let expected = ledger_of(leader);
    assert_eq!(expected.len(), 2);
    assert_eq!(expected[0].1, old_term);

    cluster.shutdown().await;
}
