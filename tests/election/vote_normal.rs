//! Every vote outcome a settled two-node group can produce.
//!
//! Scenario:
//!
//! 1. Start n0 and n1 and wait until one of them leads.
//! 2. Replicate one entry so both ledgers end at index 0.
//! 3. Stop both maintain loops, freezing the state.
//! 4. Send crafted vote requests to the leader and the follower.
//!
//! Expected Result:
//!
//! - unknown candidate: REJECT_UNKNOWN_LEADER
//! - the leader's own vote for itself: ACCEPT, and the follower agrees
//! - the leader named as candidate by a peer: REJECT_UNEXPECTED_LEADER
//! - an older term: REJECT_EXPIRED_VOTE_TERM
//! - the follower as candidate in the current term: REJECT_ALREADY__HAS_LEADER
//! - a candidate ledger behind on term or index: REJECT_EXPIRED_LEGER_TERM,
//!   then REJECT_SMALL_LEGER_END_INDEX

use d_ledger::RequestHandler;
use d_ledger::ResponseCode;
use d_ledger::Role;
use d_ledger::VoteRequest;
use d_ledger::VoteResult;
use tracing_test::traced_test;

use crate::common::append;
use crate::common::wait_until;
use crate::common::TestCluster;
use crate::common::GROUP;

#[tokio::test]
#[traced_test]
async fn test_vote_normal() {
    let cluster = TestCluster::new(2);
    cluster.start();

    let leader = cluster.wait_for_leader(&[]).await;
    let follower = cluster
        .nodes
        .iter()
        .find(|n| n.self_id() != leader.self_id())
        .unwrap();

    let leader_state = leader.role_snapshot();
    let follower_state = follower.role_snapshot();
    assert_eq!(leader_state.leader_id.as_ref(), Some(leader.self_id()));
    assert_eq!(follower_state.role, Role::Follower);
    assert_eq!(follower_state.leader_id, leader_state.leader_id);
    assert_eq!(follower_state.term, leader_state.term);
    assert_eq!(leader.member_state().lock().ledger_end_index(), -1);
    assert_eq!(follower.member_state().lock().ledger_end_index(), -1);

    let response = append(leader, "first").await;
    assert_eq!(response.code, ResponseCode::Success);
    wait_until("follower to hold index 0", || {
        follower.member_state().lock().ledger_end_index() == 0
    })
    .await;
    cluster.shutdown().await;

    let term = leader_state.term;
    let leader_id = leader.self_id().clone();
    let follower_id = follower.self_id().clone();
    let request = |remote_id: &str, candidate: &str, term: i64| VoteRequest {
        group: GROUP.to_string(),
        remote_id: remote_id.to_string(),
        local_id: candidate.to_string(),
        term,
        leader_id: candidate.to_string(),
        ledger_end_index: 0,
        ledger_end_term: term,
    };

    let response = leader
        .server()
        .handle_vote(request(&leader_id, "n2", term))
        .await
        .unwrap();
    assert_eq!(response.result, VoteResult::RejectUnknownLeader);

    let response = leader
        .elector()
        .handle_vote(request(&leader_id, &leader_id, term), true)
        .unwrap();
    assert_eq!(response.result, VoteResult::Accept);
    let response = follower
        .server()
        .handle_vote(request(&follower_id, &leader_id, term))
        .await
        .unwrap();
    assert_eq!(response.result, VoteResult::Accept);
    let response = leader
        .server()
        .handle_vote(request(&leader_id, &leader_id, term))
        .await
        .unwrap();
    assert_eq!(response.result, VoteResult::RejectUnexpectedLeader);

    let response = leader
        .server()
        .handle_vote(request(&leader_id, &follower_id, term - 1))
        .await
        .unwrap();
    assert_eq!(response.result, VoteResult::RejectExpiredVoteTerm);

    let response = leader
        .server()
        .handle_vote(request(&leader_id, &follower_id, term))
        .await
        .unwrap();
    assert_eq!(response.result, VoteResult::RejectAlreadyHasLeader);

    let own = request(&leader_id, &leader_id, term);
    leader.member_state().lock().update_ledger_end(0, term + 1).unwrap();
    let response = leader.elector().handle_vote(own.clone(), true).unwrap();
    assert_eq!(response.result, VoteResult::RejectExpiredLegerTerm);

    leader.member_state().lock().update_ledger_end(1, term).unwrap();
    let response = leader.elector().handle_vote(own, true).unwrap();
    assert_eq!(response.result, VoteResult::RejectSmallLegerEndIndex);
    assert_eq!(response.term, term);
}
