//! A candidate that already voted for another member in its term refuses
//! its own vote, then wins a later term.
//!
//! Scenario:
//!
//! 1. Build n0 and n1 but leave their maintain loops stopped.
//! 2. Put n0 into term 1 with its vote given to n1.
//! 3. Ask n0 to vote for itself in term 1.
//! 4. Start only n0; n1 still answers requests.
//!
//! Expected Result:
//!
//! - n0's own vote in term 1: REJECT_ALREADY_VOTED
//! - n0 opens a later term and becomes leader, n1 follows it

use d_ledger::Role;
use d_ledger::VoteRequest;
use d_ledger::VoteResult;
use tracing_test::traced_test;

use crate::common::TestCluster;
use crate::common::GROUP;

#[tokio::test]
#[traced_test]
async fn test_vote_already_voted() {
    let cluster = TestCluster::new(2);
    let n0 = cluster.node("n0");

    {
        let mut state = n0.member_state().lock();
        assert_eq!(state.next_term().unwrap(), 1);
        state.set_vote_for("n1").unwrap();
    }

    let own_vote = VoteRequest {
        group: GROUP.to_string(),
        remote_id: "n0".to_string(),
        local_id: "n0".to_string(),
        term: 1,
        leader_id: "n0".to_string(),
        ledger_end_index: -1,
        ledger_end_term: -1,
    };
    let response = n0.elector().handle_vote(own_vote, true).unwrap();
    assert_eq!(response.result, VoteResult::RejectAlreadyVoted);
    assert_eq!(response.term, 1);
    assert_eq!(n0.member_state().lock().current_vote_for(), Some(&"n1".to_string()));

    n0.start().unwrap();
    let leader = cluster.wait_for_leader(&[]).await;
    assert_eq!(leader.self_id(), "n0");

    let snapshot = n0.role_snapshot();
    assert_eq!(snapshot.role, Role::Leader);
    assert!(snapshot.term > 1);
    assert_eq!(n0.member_state().lock().current_vote_for(), Some(&"n0".to_string()));
    assert_eq!(cluster.node("n1").role_snapshot().leader_id, Some("n0".to_string()));

    cluster.shutdown().await;
}
