//! A candidate whose term is behind its own ledger is refused, and the node
//! recovers by running for the next term.
//!
//! Scenario:
//!
//! 1. A single node n0 elects itself at term T and appends one entry.
//! 2. Its ledger end is bumped to term T + 1.
//! 3. A self vote at term T carrying that ledger end is judged.
//! 4. n0 is pushed back to candidate at term T.
//!
//! Expected Result:
//!
//! - the vote is REJECT_TERM_SMALL_THAN_LEGER
//! - n0 leads again, at term T + 1

use d_ledger::ResponseCode;
use d_ledger::Role;
use d_ledger::VoteRequest;
use d_ledger::VoteResult;

use crate::common::append;
use crate::common::wait_until;
use crate::common::TestCluster;
use crate::common::GROUP;

#[tokio::test]
async fn test_vote_term_small_than_ledger() {
    let cluster = TestCluster::new(1);
    cluster.start();
    let node = cluster.wait_for_leader(&[]).await;

    let response = append(node, "only").await;
    assert_eq!(response.code, ResponseCode::Success);

    let term = node.role_snapshot().term;
    node.member_state().lock().update_ledger_end(0, term + 1).unwrap();

    let response = node
        .elector()
        .handle_vote(
            VoteRequest {
                group: GROUP.to_string(),
                remote_id: "n0".to_string(),
                local_id: "n0".to_string(),
                term,
                leader_id: "n0".to_string(),
                ledger_end_index: 0,
                ledger_end_term: term + 1,
            },
            true,
        )
        .unwrap();
    assert_eq!(response.result, VoteResult::RejectTermSmallThanLeger);

    node.member_state().lock().change_to_candidate(term).unwrap();
    wait_until("n0 to lead again", || {
        let snapshot = node.role_snapshot();
        snapshot.role == Role::Leader && snapshot.term == term + 1
    })
    .await;

    cluster.shutdown().await;
}
